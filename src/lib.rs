//! A two-pass compiler and stack-based bytecode interpreter for a small
//! dynamically-typed imperative scripting language.
//!
//! See `src/bin` for the `tacc` (dump compiled form) and `tacvm`
//! (compile-and-run) executables built on this library.

pub mod back;
pub mod common;
pub mod front;
pub mod middle;

use std::io::BufRead;

pub use common::{Error, TacResult};

/// Compiles and immediately executes `source` against `input`, the
/// convenience entry point both binaries and the integration tests use.
pub fn compile_and_run<R: BufRead>(source: &str, input: R) -> TacResult<()> {
    let program = middle::compile(source)?;
    let mut vm = back::Vm::new(&program, input);
    vm.run()
}
