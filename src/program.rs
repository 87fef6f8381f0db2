//! The frozen output of compilation and the pipeline that produces it.
//!
//! A [`Program`] owns the token pool, the line list (kept for
//! diagnostics and traces), the variable and procedure tables, the
//! instruction stream and the stack sizing.  It is immutable once
//! built; any number of executions may run against it.

use crate::callback::Callback;
use crate::constants::MAX_PASSES;
use crate::error::CompileError;
use crate::log::LogSink;
use crate::pool::TokenPool;
use crate::symbols::{Procedure, Variable};
use crate::tokenizer::Line;
use crate::vm::Flags;
use crate::Word;
use std::fmt;
use std::fs;

/// Mutable state threaded through the compile stages.  Each stage
/// reads and rewrites the line list and grows the symbol tables; the
/// driver freezes the result into a [`Program`].
pub(crate) struct Compiler<'a> {
    pub pool: TokenPool,
    pub lines: Vec<Line>,
    pub vars: Vec<Variable>,
    pub procs: Vec<Procedure>,
    pub inst: Vec<Word>,
    pub initialstack: usize,
    pub stacksize: usize,
    pub callbacks: &'a [Callback],
    pub log: &'a mut dyn LogSink,
    pub stage: String,
    /// Line under evaluation, for diagnostics.
    pub logline: usize,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(callbacks: &'a [Callback], log: &'a mut dyn LogSink) -> Compiler<'a> {
        Compiler {
            pool: TokenPool::new(),
            lines: Vec::new(),
            vars: Vec::new(),
            procs: Vec::new(),
            inst: Vec::new(),
            initialstack: 0,
            stacksize: 0,
            callbacks,
            log,
            stage: String::new(),
            logline: 0,
        }
    }

    pub(crate) fn log_msg(&mut self, args: fmt::Arguments) {
        self.log.log(format_args!("{}: {}\n", self.stage, args));
    }

    /// Diagnostic pinned to the line currently under evaluation.
    pub(crate) fn log_line(&mut self, args: fmt::Arguments) {
        if let Some(line) = self.lines.get(self.logline) {
            let module = self.pool.get(line.module);
            self.log.log(format_args!(
                "{}:{}:{}: {}\n",
                self.stage, module, line.line, args
            ));
        } else {
            self.log.log(format_args!("{}: {}\n", self.stage, args));
        }
    }

    /// Diagnostic for a position known before the line list exists.
    pub(crate) fn log_at(&mut self, module: u32, line: u32, args: fmt::Arguments) {
        let module = self.pool.get(module);
        self.log.log(format_args!(
            "{}:{}:{}: {}\n",
            self.stage, module, line, args
        ));
    }

    fn dump_lines(&self) -> String {
        dump_lines(&self.pool, &self.lines)
    }

    fn write_pass(&mut self, filename: &str) -> Result<(), CompileError> {
        let dump = self.dump_lines();
        if let Err(err) = fs::write(filename, dump) {
            self.log_msg(format_args!("Couldn't write {}: {}.", filename, err));
            return Err(CompileError::EmitPasses);
        }
        Ok(())
    }
}

pub(crate) fn dump_lines(pool: &TokenPool, lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        for (i, &token) in line.tokens.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(pool.get(token));
        }
        out.push('\n');
    }
    out
}

pub struct Program {
    pub(crate) pool: TokenPool,
    pub(crate) lines: Vec<Line>,
    pub(crate) vars: Vec<Variable>,
    pub(crate) procs: Vec<Procedure>,
    pub(crate) inst: Vec<Word>,
    pub(crate) initialstack: usize,
    pub(crate) stacksize: usize,
}

impl Program {
    /// Runs the whole compile pipeline: tokenize (with includes),
    /// preprocessor fix-point passes, callback variable registration,
    /// symbols scan and verification, code generation and code
    /// verification.  Diagnostics go to `log`; the returned error only
    /// records the stage that failed.
    pub fn compile(
        name: &str,
        source: &str,
        flags: &Flags,
        callbacks: &[Callback],
        defines: &[(String, String)],
        log: &mut dyn LogSink,
    ) -> Result<Program, CompileError> {
        for cb in callbacks {
            if !cb.handlers.readable() && !cb.handlers.writable() {
                log.log(format_args!(
                    "callbacks: Callback variables must have a read and/or write \
                     handler ({}).\n",
                    cb.name
                ));
                return Err(CompileError::BadCallback);
            }
            if cb.length == 0 {
                log.log(format_args!(
                    "callbacks: Callback variables must have nonzero length ({}).\n",
                    cb.name
                ));
                return Err(CompileError::BadCallback);
            }
        }

        let mut c = Compiler::new(callbacks, log);

        c.stage = "tokenize".to_string();
        c.tokenize(name, source)?;
        if c.lines.is_empty() {
            c.log_msg(format_args!("No lines remain after pass."));
            return Err(CompileError::EmptyProgram);
        }
        if flags.emit_passes {
            c.write_pass("tokenize.cvm")?;
        }

        c.stage = "input variables".to_string();
        let mut define_offsets = Vec::with_capacity(defines.len());
        for (var, value) in defines {
            let var = c.pool.add(var);
            let value = c.pool.add(value);
            define_offsets.push((var, value));
        }

        let mut pass = 1;
        loop {
            c.stage = format!("preprocess {}", pass);
            let found_macro = c.preprocess(&define_offsets)?;
            if c.lines.is_empty() {
                c.log_msg(format_args!("No lines remain after pass."));
                return Err(CompileError::EmptyProgram);
            }
            if flags.emit_passes {
                c.write_pass(&format!("preprocess{:03}.cvm", pass))?;
            }
            if !found_macro {
                break;
            }
            if pass == MAX_PASSES {
                c.log_msg(format_args!("Preprocess passes exceeded."));
                return Err(CompileError::PassesExceeded);
            }
            pass += 1;
        }

        c.stage = "adding callbacks".to_string();
        for (index, cb) in callbacks.iter().enumerate() {
            let name = c.pool.add(&cb.name);
            c.new_variable(
                name,
                cb.handlers.value_type(),
                cb.length,
                None,
                Some(index),
                None,
            )
            .map_err(|_| CompileError::BadCallback)?;
        }

        c.stage = "symbols scan".to_string();
        c.symbols_scan()?;
        if c.lines.is_empty() {
            c.log_msg(format_args!("No lines remain after pass."));
            return Err(CompileError::EmptyProgram);
        }

        c.stage = "symbols verification".to_string();
        c.symbols_verify()?;

        c.stage = "code generation".to_string();
        c.codegen()?;

        let program = Program {
            pool: c.pool,
            lines: c.lines,
            vars: c.vars,
            procs: c.procs,
            inst: c.inst,
            initialstack: c.initialstack,
            stacksize: c.stacksize,
        };

        program.code_verify(log)?;

        Ok(program)
    }

    pub fn find_procedure(&self, name: &str) -> Option<usize> {
        self.procs
            .iter()
            .position(|p| self.pool.get(p.name) == name)
    }

    /// True when a procedure of that name exists and takes no
    /// arguments.
    pub fn has_entrypoint(&self, name: &str) -> bool {
        match self.find_procedure(name) {
            Some(p) => self.procs[p].args == 0,
            None => false,
        }
    }

    /// The post-symbols line list, one line per instruction, tokens
    /// joined by single spaces.  This is the same serialization the
    /// emit-passes flag writes after each stage.
    pub fn dump_lines(&self) -> String {
        dump_lines(&self.pool, &self.lines)
    }

    /// Bytes held by the token pool.
    pub fn token_bytes(&self) -> usize {
        self.pool.len()
    }

    /// Runtime stack size in bytes.
    pub fn stack_size(&self) -> usize {
        self.stacksize
    }

    /// Words in the instruction stream.
    pub fn instruction_words(&self) -> usize {
        self.inst.len()
    }
}
