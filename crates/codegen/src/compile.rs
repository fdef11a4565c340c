//! Compile pipeline for a single unit: lowering, flow rewriting, verification.

use crate::{
    error::{CodegenError, CodegenErrorType, InternalError},
    lower::lower,
    rewrite::{FlowSummary, rewrite},
    verify::verify,
};
use flowrite_compiler_core::CodeUnit;

type CompileResult<T> = Result<T, CodegenError>;

#[derive(Debug, Clone)]
pub struct CompileOpts {
    /// Replace structured loops and returns with labels and jumps before
    /// rewriting; disable only for units that are already lowered
    pub lower: bool,
    /// Check the rewritten unit before handing it out
    pub verify: bool,
}

impl Default for CompileOpts {
    fn default() -> Self {
        Self {
            lower: true,
            verify: true,
        }
    }
}

/// A unit whose jumps no longer leave `finally`/`fault` bodies.
#[derive(Debug)]
pub struct CompiledUnit {
    pub unit: CodeUnit,
    pub flow: FlowSummary,
}

/// Run the pipeline over `unit`.
pub fn compile_unit(mut unit: CodeUnit, opts: &CompileOpts) -> CompileResult<CompiledUnit> {
    if opts.lower {
        lower(&mut unit);
    }
    let flow = rewrite(&mut unit).map_err(|err| error(&unit, err))?;
    if opts.verify {
        verify(&unit).map_err(|err| error(&unit, err))?;
    }
    debug!(
        "compiled unit '{}': {} local(s), {} label(s)",
        unit.name,
        unit.locals.len(),
        unit.labels.len()
    );
    trace!("compilation completed:\n{unit}");
    Ok(CompiledUnit { unit, flow })
}

fn error(unit: &CodeUnit, err: InternalError) -> CodegenError {
    CodegenError {
        unit: unit.name.clone(),
        error: CodegenErrorType::Internal(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrite_compiler_core::{CatchBlock, Node, ValueType};

    fn compile(unit: CodeUnit) -> CompiledUnit {
        compile_unit(unit, &CompileOpts::default()).unwrap()
    }

    #[test]
    fn break_with_value_from_finally() {
        let mut unit = CodeUnit::new("main");
        let exit = unit.label_with("exit", ValueType::Int);
        let x = unit.local("x", ValueType::Any);
        unit.body = Node::block([
            Node::assign(
                x,
                Node::loop_(
                    Node::try_finally(Node::block([]), Node::goto_with(exit, Node::int(5))),
                    Some(exit),
                    None,
                ),
            ),
            Node::local(x),
        ]);
        let compiled = compile(unit);
        assert_eq!(compiled.flow.restructured, 1);
        insta::assert_snapshot!(compiled.unit.to_string(), @r"
        unit main
          local x: any
          local $flow: int [synthetic]
          local $exit.0: int [synthetic]
          local $saved: exception [synthetic]
          x =
            loop#1:
            block:
              $saved = nil
              try:
                pass
              catch as $saved:
                pass
              finally:
                block:
                  $exit.0 = 5
                  $flow = 1
                  goto flow#2
                if $saved != nil
                then:
                  throw $saved
                flow#2:
              flow#3:
              switch $flow
                case 1:
                  $flow = 0
                  goto exit#0 with $exit.0
            block:
              $flow = 0
              goto loop#1
            exit#0:
          x
        ");
    }

    #[test]
    fn return_from_fault_with_handlers() {
        let mut unit = CodeUnit::new("f");
        let e = unit.local("e", ValueType::Exception);
        unit.body = Node::try_fault(
            Node::try_catch(
                Node::raise("Boom", "first"),
                [CatchBlock::of_kind("Boom", Some(e), Node::throw(Node::local(e)))],
            ),
            Node::return_(Some(Node::str("cleaned"))),
        );
        let compiled = compile(unit);
        let ret = compiled.unit.labels.iter().find(|(_, decl)| decl.name == "return");
        let (ret, _) = ret.unwrap();
        let info = compiled.flow.registry.get(ret).unwrap();
        assert_eq!(info.flow_state, 1);
        assert!(info.carrier.is_some());
    }

    #[test]
    fn lowering_can_be_skipped() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::return_(None);
        let opts = CompileOpts {
            lower: false,
            ..CompileOpts::default()
        };
        let err = compile_unit(unit, &opts).unwrap_err();
        assert_eq!(err.unit, "f");
        assert_eq!(
            err.to_string(),
            "in unit 'f': internal compiler error: return node must be lowered before this pass"
        );
    }

    #[test]
    fn unit_without_cleanup_jumps_is_left_alone() {
        let mut unit = CodeUnit::new("f");
        let x = unit.local("x", ValueType::Int);
        unit.body = Node::try_finally(
            Node::assign(x, Node::int(1)),
            Node::call("log", [Node::local(x)]),
        );
        let before = unit.body.clone();
        let compiled = compile(unit);
        assert_eq!(compiled.unit.body, before);
        assert!(compiled.flow.flow_variable.is_none());
        assert!(compiled.flow.registry.is_empty());
    }
}
