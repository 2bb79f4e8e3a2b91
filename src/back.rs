//! The back-end: the interpreter that executes a compiled program.

pub mod interp;

pub use interp::Vm;
