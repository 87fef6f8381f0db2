//! CrustyVM is an embeddable, assembly-style scripting engine.
//!
//! A program is plain text, one statement per line.  [`Vm::new`] runs it
//! through the compile pipeline (tokenize with file inclusion, fix-point
//! macro preprocessing, symbol resolution and layout, verification, code
//! generation) and produces a VM ready to execute.  The embedder exposes
//! its own behavior to scripts as named callback variables over three
//! scalar types (int, double, byte); see [`Callback`].
//!
//! Compile-time state is frozen into a [`Program`]; all mutable run-time
//! state lives in an [`Execution`].  [`Vm`] bundles one of each together
//! with the callback table and the injected log sink.
//!
//! The interpreter is single-threaded and cooperative: [`Vm::step`]
//! processes exactly one instruction, [`Vm::run`] loops until the status
//! leaves [`Status::Active`].  It performs no allocation and no I/O of
//! its own once a program is loaded.

pub mod callback;
pub mod constants;
pub mod error;
pub mod instructions;
pub mod log;
pub mod pool;

mod codegen;
mod expr;
mod int_util;
mod preprocessor;
mod symbols;
mod tokenizer;

pub mod interpreter;
pub mod program;
pub mod vm;

#[cfg(test)]
mod test;

pub use crate::callback::{Callback, Handlers, ValueType};
pub use crate::error::{CallbackError, CompileError, RuntimeError};
pub use crate::interpreter::{Execution, Status};
pub use crate::log::{LogSink, StderrSink};
pub use crate::program::Program;
pub use crate::vm::{Flags, Vm};

/// One instruction-stream word.
pub type Word = i32;

/// Byte order for all typed access to the runtime stack.
pub(crate) type Endian = byteorder::NativeEndian;
