//! This is the `flowrite` binary. If you're looking to rewrite code units from
//! your own front end, you're likely looking for the
//! [`flowrite-compiler`](flowrite_compiler) crate.
//!
//! The binary reads a JSON file holding one code unit or a list of them,
//! rewrites every jump that leaves a `finally`/`fault` body into flow-state
//! dispatch and prints the resulting trees:
//!
//! ```text
//! flowrite [--run] [--raw] [--no-verify] [--step-limit N] FILE.json
//! ```
//!
//! Set `RUST_LOG=debug` to see what the rewriter does with each unit.

#[macro_use]
extern crate log;

mod settings;

use flowrite_compiler::{CodeUnit, CompileError, codegen::lower::lower};
use flowrite_vm::{Exception, Host, Value};
use settings::{RunMode, Settings};
use std::process::ExitCode;

pub use flowrite_compiler;
pub use flowrite_vm;

/// The main cli of the `flowrite` binary.
pub fn run() -> ExitCode {
    env_logger::init();
    let settings = match settings::parse_opts() {
        Ok(RunMode::Process(settings)) => settings,
        Ok(RunMode::Help) => {
            println!("{}", settings::usage());
            return ExitCode::SUCCESS;
        }
        Ok(RunMode::Version) => {
            println!("flowrite {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("error: {err}\n\n{}", settings::usage());
            return ExitCode::from(2);
        }
    };
    match process_file(&settings) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when a unit failed to evaluate.
fn process_file(settings: &Settings) -> Result<bool, String> {
    let path = settings.path.display().to_string();
    let source = std::fs::read_to_string(&settings.path)
        .map_err(|err| format!("{path}: could not read file: {err}"))?;

    let units: Vec<CodeUnit> = if settings.raw {
        let mut units =
            flowrite_compiler::decode(&source, &path).map_err(|err| describe(&path, &err))?;
        for unit in &mut units {
            lower(unit);
        }
        units
    } else {
        flowrite_compiler::compile_json(&source, &path, &settings.compile)
            .map_err(|err| describe(&path, &err))?
            .into_iter()
            .map(|compiled| compiled.unit)
            .collect()
    };

    let mut ok = true;
    for unit in &units {
        print!("{unit}");
        if settings.run {
            let mut host = StdoutHost;
            match flowrite_vm::run(unit, &mut host, &settings.eval) {
                Ok(value) => println!("=> {value}"),
                Err(err) => {
                    error!("evaluation of unit '{}' failed", unit.name);
                    eprintln!("{path}: unit '{}': {err}", unit.name);
                    ok = false;
                }
            }
        }
    }
    Ok(ok)
}

fn describe(path: &str, err: &CompileError) -> String {
    match err.location() {
        Some((line, column)) => format!("{path}:{line}:{column}: {err}"),
        None => format!("{path}: {err}"),
    }
}

/// Host for the command line: `print` writes its arguments, every other call
/// is echoed and yields `nil`.
struct StdoutHost;

impl Host for StdoutHost {
    fn call(&mut self, callee: &str, args: &[Value]) -> Result<Value, Exception> {
        let args = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        if callee == "print" {
            println!("{args}");
        } else {
            println!("call {callee}({args})");
        }
        Ok(Value::Nil)
    }
}
