use flowrite_codegen::compile::compile_unit;
use serde::Deserialize;

pub use flowrite_codegen::{CompileOpts, CompiledUnit};
pub use flowrite_compiler_core::CodeUnit;

// re-exported for convenience of the binary and of embedders
pub use flowrite_codegen as codegen;
pub use flowrite_compiler_core as core;
use thiserror::Error;

/// Input that is not a well-formed JSON code unit.
#[derive(Error, Debug)]
pub struct DecodeError {
    #[source]
    pub error: serde_json::Error,
    pub source_path: String,
}

impl ::core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        self.error.fmt(f)
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Codegen(#[from] codegen::error::CodegenError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl CompileError {
    /// One-based `(line, column)` of a decoding error.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            Self::Codegen(_) => None,
            Self::Decode(decode_error) => {
                Some((decode_error.error.line(), decode_error.error.column()))
            }
        }
    }

    pub fn source_path(&self) -> Option<&str> {
        match self {
            Self::Codegen(_) => None,
            Self::Decode(decode_error) => Some(&decode_error.source_path),
        }
    }
}

/// A source file holds either one unit or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum Units {
    One(CodeUnit),
    Many(Vec<CodeUnit>),
}

/// Decode the code units in a JSON source.
pub fn decode(source: &str, source_path: &str) -> Result<Vec<CodeUnit>, CompileError> {
    let units = serde_json::from_str(source).map_err(|error| DecodeError {
        error,
        source_path: source_path.to_owned(),
    })?;
    Ok(match units {
        Units::One(unit) => vec![unit],
        Units::Many(units) => units,
    })
}

/// Compile one unit.
pub fn compile(unit: CodeUnit, opts: &CompileOpts) -> Result<CompiledUnit, CompileError> {
    Ok(compile_unit(unit, opts)?)
}

/// Compile every unit of a JSON source, each with its own rewriter state.
pub fn compile_json(
    source: &str,
    source_path: &str,
    opts: &CompileOpts,
) -> Result<Vec<CompiledUnit>, CompileError> {
    let units = decode(source, source_path)?;
    log::debug!("decoded {} unit(s) from {source_path}", units.len());
    units.into_iter().map(|unit| compile(unit, opts)).collect()
}

#[test]
fn test_compile_single_unit() {
    let source = r#"{
        "name": "main",
        "labels": [{ "name": "end" }],
        "locals": [{ "name": "x", "ty": "int" }],
        "body": { "block": [
            { "try": {
                "body": { "assign": { "target": 0, "value": { "const": { "int": 1 } } } },
                "finally": { "goto": { "target": 0 } }
            } },
            { "label": { "target": 0 } },
            { "local": 0 }
        ] }
    }"#;
    let compiled = compile_json(source, "<test>", &CompileOpts::default()).expect("compile error");
    assert_eq!(compiled.len(), 1);
    assert_eq!(compiled[0].flow.restructured, 1);
}

#[test]
fn test_compile_unit_list() {
    let source = r#"[
        { "name": "a", "body": { "const": "nil" } },
        { "name": "b", "body": { "return": { "const": { "str": "hi" } } } }
    ]"#;
    let compiled = compile_json(source, "<test>", &CompileOpts::default()).expect("compile error");
    let names: Vec<_> = compiled.iter().map(|c| c.unit.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    // units do not share labels or flow state
    assert!(compiled[0].unit.labels.is_empty());
    assert_eq!(compiled[1].unit.labels.len(), 1);
}

#[test]
fn test_decode_error_location() {
    let err = compile_json("{\n  \"name\": \"f\",\n", "bad.json", &CompileOpts::default())
        .expect_err("decoded a truncated unit");
    assert_eq!(err.source_path(), Some("bad.json"));
    let (line, _) = err.location().expect("decode errors have a location");
    assert!(line >= 2);
}
