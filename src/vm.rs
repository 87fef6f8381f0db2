//! The embedder-facing facade: one compiled [`Program`], one
//! [`Execution`], the callback table and the injected log sink,
//! bundled behind the load/reset/begin/step/run surface.

use crate::callback::Callback;
use crate::error::{CompileError, RuntimeError};
use crate::interpreter::{Execution, Machine, Status};
use crate::log::LogSink;
use crate::program::Program;

/// Behavior switches accepted by [`Vm::new`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Flags {
    /// Write each compile pass's line list to a file, for debugging
    /// programs (and the compiler).
    pub emit_passes: bool,
    /// Re-verify every instruction as it is about to execute.
    pub trace: bool,
}

pub struct Vm {
    program: Program,
    callbacks: Vec<Callback>,
    exec: Execution,
    log: Box<dyn LogSink>,
    trace: bool,
}

impl Vm {
    /// Compiles `source` and prepares a VM to run it.  `name` labels
    /// the module in diagnostics.  `callstack_size` of 0 selects the
    /// default depth of 256.  `defines` are the preprocessor's external
    /// substitution variables.  All diagnostics, now and at run time,
    /// go through `log`.
    pub fn new(
        name: &str,
        source: &str,
        flags: Flags,
        callstack_size: usize,
        callbacks: Vec<Callback>,
        defines: &[(String, String)],
        mut log: Box<dyn LogSink>,
    ) -> Result<Vm, CompileError> {
        let program = Program::compile(name, source, &flags, &callbacks, defines, log.as_mut())?;
        let exec = Execution::new(&program, callstack_size);
        Ok(Vm {
            program,
            callbacks,
            exec,
            log,
            trace: flags.trace,
        })
    }

    fn machine(&mut self) -> Machine {
        Machine {
            prog: &self.program,
            exec: &mut self.exec,
            callbacks: &mut self.callbacks,
            log: self.log.as_mut(),
            trace: self.trace,
        }
    }

    /// Reinitializes globals and status; code is preserved.
    pub fn reset(&mut self) {
        self.exec.reset(&self.program);
    }

    /// Prepares execution to start at the named zero-argument
    /// procedure.
    pub fn begin(&mut self, name: &str) -> Result<(), RuntimeError> {
        self.machine().begin(name)
    }

    /// Processes exactly one instruction and reports the new status.
    pub fn step(&mut self) -> Status {
        self.machine().step()
    }

    /// Runs the named procedure until the status leaves Active.
    pub fn run(&mut self, name: &str) -> Result<(), RuntimeError> {
        self.begin(name)?;
        while self.step() == Status::Active {}

        let status = self.exec.status();
        if status != Status::Ready {
            self.log.log(format_args!(
                "running: Execution stopped with error: {}\n",
                status
            ));
            return Err(RuntimeError::Faulted(status));
        }
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.exec.status()
    }

    /// True when a procedure of that name exists and takes zero
    /// arguments.
    pub fn has_entrypoint(&self, name: &str) -> bool {
        self.program.has_entrypoint(name)
    }

    /// Logs the run-time state through the sink; `full` includes the
    /// values of every variable.
    pub fn debugtrace(&mut self, full: bool) {
        self.machine().debugtrace(full);
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}
