use flowrite_compiler::CompileOpts;
use flowrite_vm::{EvalMode, EvalOpts};
use lexopt::prelude::*;
use std::ffi::OsString;
use std::path::PathBuf;

const USAGE: &str = "\
usage: flowrite [OPTIONS] FILE.json

Rewrites the code units in FILE.json so that no jump leaves a finally or
fault body, and prints the result.

options:
  --run              evaluate each unit after printing it
  --raw              only lower loops and returns; do not rewrite jumps
  --no-verify        skip the check of the rewritten units
  --step-limit N     give up evaluating after N nodes (default 1000000)
  -h, --help         print this message";

pub enum RunMode {
    Help,
    Version,
    Process(Settings),
}

#[derive(Debug)]
pub struct Settings {
    pub path: PathBuf,
    pub compile: CompileOpts,
    /// Print (and evaluate) lowered units without flow rewriting
    pub raw: bool,
    pub run: bool,
    pub eval: EvalOpts,
}

pub fn usage() -> &'static str {
    USAGE
}

pub fn parse_opts() -> Result<RunMode, lexopt::Error> {
    parse_args(std::env::args_os().skip(1))
}

pub fn parse_args(args: impl IntoIterator<Item = OsString>) -> Result<RunMode, lexopt::Error> {
    let mut parser = lexopt::Parser::from_args(args);
    let mut path = None;
    let mut compile = CompileOpts::default();
    let mut raw = false;
    let mut run = false;
    let mut eval = EvalOpts::default();

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => return Ok(RunMode::Help),
            Short('V') | Long("version") => return Ok(RunMode::Version),
            Long("run") => run = true,
            Long("raw") => raw = true,
            Long("no-verify") => compile.verify = false,
            Long("step-limit") => {
                let limit: u64 = parser.value()?.parse()?;
                eval.step_limit = (limit > 0).then_some(limit);
            }
            Value(value) if path.is_none() => path = Some(PathBuf::from(value)),
            _ => return Err(arg.unexpected()),
        }
    }

    let path = path.ok_or(lexopt::Error::MissingValue {
        option: Some("FILE.json".to_owned()),
    })?;
    // unrewritten units may still jump out of cleanup bodies
    eval.mode = if raw {
        EvalMode::Permissive
    } else {
        EvalMode::Strict
    };
    Ok(RunMode::Process(Settings {
        path,
        compile,
        raw,
        run,
        eval,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<RunMode, lexopt::Error> {
        parse_args(args.iter().map(OsString::from))
    }

    #[test]
    fn defaults() {
        let Ok(RunMode::Process(settings)) = parse(&["unit.json"]) else {
            panic!("expected settings");
        };
        assert_eq!(settings.path, PathBuf::from("unit.json"));
        assert!(settings.compile.verify);
        assert!(settings.compile.lower);
        assert!(!settings.run);
        assert_eq!(settings.eval.mode, EvalMode::Strict);
    }

    #[test]
    fn raw_run_evaluates_permissively() {
        let Ok(RunMode::Process(settings)) =
            parse(&["--raw", "--run", "--no-verify", "--step-limit", "50", "u.json"])
        else {
            panic!("expected settings");
        };
        assert!(settings.raw && settings.run);
        assert!(!settings.compile.verify);
        assert_eq!(settings.eval.mode, EvalMode::Permissive);
        assert_eq!(settings.eval.step_limit, Some(50));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(parse(&["--help", "x.json"]), Ok(RunMode::Help)));
        assert!(parse(&[]).is_err());
        assert!(parse(&["a.json", "b.json"]).is_err());
        assert!(parse(&["--step-limit", "many", "a.json"]).is_err());
        assert!(parse(&["--frobnicate", "a.json"]).is_err());
    }
}
