//! Ghost CLI: run a script file or start the REPL.
//!
//! Exit codes: 0 on success, 65 on compile errors, 70 on runtime errors.

mod repl;

use ghost_compiler::{interpret, InterpretError};
use ghost_vm::debug::disassemble_chunk;
use ghost_vm::gc::GcPtr;
use ghost_vm::value::{Function, Value};
use ghost_vm::{GcConfig, Vm};
use std::process::ExitCode;

const COMPILE_ERROR: u8 = 65;
const RUNTIME_ERROR: u8 = 70;

fn usage() {
    eprintln!("Usage: ghost [options] [script]");
    eprintln!();
    eprintln!("Run a Ghost program file, or start a REPL when no script is given.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --disassemble  Print the compiled bytecode instead of running");
    eprintln!("  --gc-stress    Collect garbage at every allocation safepoint");
    eprintln!("  --gc-log       Log collector activity to stderr");
    eprintln!("  --help         Show this help message");
    eprintln!("  --version      Show version information");
}

fn main() -> ExitCode {
    let mut config = GcConfig::default();
    let mut disassemble = false;
    let mut script = None;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                usage();
                return ExitCode::SUCCESS;
            }
            "--version" | "-v" => {
                println!("ghost {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "--gc-stress" => config.stress = true,
            "--gc-log" => config.log = true,
            "--disassemble" => disassemble = true,
            _ if arg.starts_with('-') => {
                eprintln!("Unknown option '{arg}'");
                usage();
                return ExitCode::FAILURE;
            }
            _ if script.is_some() => {
                eprintln!("Only one script file may be given");
                return ExitCode::FAILURE;
            }
            _ => script = Some(arg),
        }
    }

    match script {
        Some(path) => run_file(&path, config, disassemble),
        None => repl::run(config),
    }
}

fn run_file(path: &str, config: GcConfig, disassemble: bool) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Error reading '{path}': {error}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::with_config(config);
    if disassemble {
        return match ghost_compiler::compile(&mut vm, &source) {
            Ok(function) => {
                print!("{}", dump_function(&vm, function, path));
                ExitCode::SUCCESS
            }
            Err(errors) => {
                for error in errors {
                    eprintln!("{error}");
                }
                ExitCode::from(COMPILE_ERROR)
            }
        };
    }

    match interpret(&mut vm, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretError::Compile(errors)) => {
            for error in errors {
                eprintln!("{error}");
            }
            ExitCode::from(COMPILE_ERROR)
        }
        Err(InterpretError::Runtime(error)) => {
            eprintln!("{error}");
            ExitCode::from(RUNTIME_ERROR)
        }
    }
}

/// Disassemble a function and, below it, every function in its constant
/// pool.
fn dump_function(vm: &Vm, function: GcPtr<Function>, name: &str) -> String {
    let chunk = &vm.heap.get_function(function).chunk;
    let mut out = disassemble_chunk(&vm.heap, chunk, name);
    for constant in &chunk.constants {
        if let Value::Function(inner) = constant {
            let inner_name = vm.heap.format_value(*constant);
            out.push('\n');
            out.push_str(&dump_function(vm, *inner, &inner_name));
        }
    }
    out
}
