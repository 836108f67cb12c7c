//! Token stream to bytecode compiler for the Ghost language, plus the
//! host entry point that runs a source string on a VM.

pub mod compile;

pub use compile::{compile, CompileError};

use ghost_vm::{RuntimeError, Vm};
use thiserror::Error;

/// Outcome of [`interpret`]. The CLI maps `Compile` to exit code 65 and
/// `Runtime` to 70.
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Compile and run a source string on the given VM.
pub fn interpret(vm: &mut Vm, source: &str) -> Result<(), InterpretError> {
    let function = compile(vm, source).map_err(InterpretError::Compile)?;
    vm.execute(function)?;
    Ok(())
}
