//! Error types for the two failure horizons: aggregate compile failures
//! (individual diagnostics have already gone to the log sink) and
//! run-time control errors around `begin`/`run`.

use crate::interpreter::Status;
use std::error::Error as StdError;
use std::fmt;

/// Which stage of compilation gave up.  The per-fault diagnostics were
/// reported through the log sink before this was returned; there is no
/// partial VM.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompileError {
    BadCallback,
    Tokenize,
    Preprocess,
    PassesExceeded,
    EmptyProgram,
    Symbols,
    SymbolsVerify,
    Codegen,
    CodeVerify,
    EmitPasses,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CompileError::BadCallback => "invalid callback descriptor",
            CompileError::Tokenize => "tokenizing failed",
            CompileError::Preprocess => "preprocessing failed",
            CompileError::PassesExceeded => "preprocessor passes exceeded",
            CompileError::EmptyProgram => "no lines remain after pass",
            CompileError::Symbols => "symbols scan failed",
            CompileError::SymbolsVerify => "symbols verification failed",
            CompileError::Codegen => "code generation failed",
            CompileError::CodeVerify => "code verification failed",
            CompileError::EmitPasses => "writing pass output failed",
        })
    }
}

impl StdError for CompileError {}

/// Failure to start or finish a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuntimeError {
    /// `begin` called while the VM is not in the Ready state.
    NotReady,
    /// The named entry point does not exist.
    UnknownProcedure(String),
    /// The named entry point takes arguments.
    EntrypointArgs(String),
    /// Execution stopped with a fault status.
    Faulted(Status),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::NotReady => f.write_str("status is not ready"),
            RuntimeError::UnknownProcedure(name) => {
                write!(f, "couldn't find procedure: {}", name)
            }
            RuntimeError::EntrypointArgs(name) => {
                write!(f, "can't enter from procedure with arguments: {}", name)
            }
            RuntimeError::Faulted(status) => {
                write!(f, "execution stopped with error: {}", status)
            }
        }
    }
}

impl StdError for RuntimeError {}

impl From<Status> for RuntimeError {
    fn from(status: Status) -> RuntimeError {
        RuntimeError::Faulted(status)
    }
}

/// Returned by callback handlers to halt the program with
/// [`Status::CallbackFailed`](crate::Status::CallbackFailed).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallbackError;

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("callback returned failure")
    }
}

impl StdError for CallbackError {}
