//! Fourth stage: emit the flat instruction stream, then prove it safe.
//!
//! Every remaining line emits exactly one instruction.  Jump operands
//! are emitted as destination line numbers and rewritten to instruction
//! offsets in a second pass once every line's position is known.
//!
//! Code verification walks the finished stream and re-checks everything
//! the interpreter will later take on faith: operand windows, variable
//! and procedure indices, immediate array bounds, callback access
//! direction, and that every jump lands on an instruction boundary
//! inside its own procedure.

use crate::error::CompileError;
use crate::instructions::*;
use crate::int_util::parse_int;
use crate::log::LogSink;
use crate::program::{Compiler, Program};
use crate::Word;
use matches::debug_assert_matches;
use num_traits::FromPrimitive;
use std::fmt;

impl<'a> Compiler<'a> {
    /// Parses one operand into its (flags, val, index) descriptor:
    /// an integer literal, `name`, `name:` (length-of), `name:N`, or
    /// `name:other`.
    fn populate_var(
        &mut self,
        token: u32,
        proc: Option<usize>,
        readable: bool,
        writable: bool,
    ) -> Result<(Word, Word, Word), CompileError> {
        let name = self.pool.get(token).to_string();

        if let Some(value) = parse_int(&name) {
            if writable {
                self.log_line(format_args!("Immediate values aren't writable."));
                return Err(CompileError::Codegen);
            }
            return Ok((MOVE_FLAG_IMMEDIATE, value, 0));
        }

        let (base, index_part) = match name.rfind(':') {
            Some(colon) => (&name[..colon], Some(&name[colon + 1..])),
            None => (name.as_str(), None),
        };

        let var = match self.find_variable(proc, base) {
            Some(var) => var,
            None => {
                self.log_line(format_args!("Variable {} not found.", base));
                return Err(CompileError::Codegen);
            }
        };

        if writable && self.vars[var].read_only() {
            self.log_line(format_args!("{} isn't a writable callback.", base));
            return Err(CompileError::Codegen);
        }
        if readable && self.vars[var].write_only() {
            self.log_line(format_args!("{} isn't a readable callback.", base));
            return Err(CompileError::Codegen);
        }

        match index_part {
            None => Ok((
                MOVE_FLAG_VAR | MOVE_FLAG_INDEX_IMMEDIATE,
                var as Word,
                0,
            )),
            Some("") => {
                // length-of reference
                if writable {
                    self.log_line(format_args!("Array length isn't writable."));
                    return Err(CompileError::Codegen);
                }
                Ok((MOVE_FLAG_LENGTH, var as Word, 0))
            }
            Some(index) => {
                if let Some(value) = parse_int(index) {
                    if value < 0 || value > self.vars[var].length as Word - 1 {
                        self.log_line(format_args!("Immediate index out of array size."));
                        return Err(CompileError::Codegen);
                    }
                    Ok((MOVE_FLAG_VAR | MOVE_FLAG_INDEX_IMMEDIATE, var as Word, value))
                } else {
                    let index_var = match self.find_variable(proc, index) {
                        Some(index_var) => index_var,
                        None => {
                            self.log_line(format_args!(
                                "Array index variable {} not found.",
                                index
                            ));
                            return Err(CompileError::Codegen);
                        }
                    };
                    if self.vars[index_var].write_only() {
                        self.log_line(format_args!("{} isn't a readable callback.", index));
                        return Err(CompileError::Codegen);
                    }
                    Ok((MOVE_FLAG_VAR | MOVE_FLAG_INDEX_VAR, var as Word, index_var as Word))
                }
            }
        }
    }

    fn find_label(&self, proc: usize, name: &str) -> Option<usize> {
        self.procs[proc]
            .labels
            .iter()
            .find(|l| self.pool.get(l.name) == name)
            .map(|l| l.line)
    }

    /// Emits an instruction taking a destination and a source operand.
    fn emit_pair(
        &mut self,
        op: Opcode,
        line: usize,
        proc: usize,
        dest_access: (bool, bool),
        src_access: (bool, bool),
    ) -> Result<(), CompileError> {
        let tokens = self.lines[line].tokens.clone();
        if tokens.len() != 3 {
            if op == Opcode::Move {
                self.log_line(format_args!("move takes a destination and source."));
            } else {
                self.log_line(format_args!("{} takes two operands.", op.mnemonic()));
            }
            return Err(CompileError::Codegen);
        }

        let (df, dv, di) =
            self.populate_var(tokens[1], Some(proc), dest_access.0, dest_access.1)?;
        let (sf, sv, si) = self.populate_var(tokens[2], Some(proc), src_access.0, src_access.1)?;
        self.inst
            .extend_from_slice(&[op as Word, df, dv, di, sf, sv, si]);

        Ok(())
    }

    pub(crate) fn codegen(&mut self) -> Result<(), CompileError> {
        let mut curproc: Option<usize> = None;
        let mut procnum = 0;

        for line in 0..self.lines.len() {
            self.logline = line;
            if curproc.is_none()
                && procnum < self.procs.len()
                && line == self.procs[procnum].start
            {
                curproc = Some(procnum);
                self.procs[procnum].instruction = self.inst.len();
            }
            let proc = match curproc {
                Some(proc) => proc,
                None => {
                    self.log_line(format_args!("BUG: code line not in a procedure."));
                    return Err(CompileError::Codegen);
                }
            };

            self.lines[line].instruction = self.inst.len();

            let first = self.pool.get(self.lines[line].tokens[0]).to_string();
            match first.as_str() {
                "move" => self.emit_pair(Opcode::Move, line, proc, (false, true), (true, false))?,
                "add" => self.emit_pair(Opcode::Add, line, proc, (true, true), (true, false))?,
                "sub" => self.emit_pair(Opcode::Sub, line, proc, (true, true), (true, false))?,
                "mul" => self.emit_pair(Opcode::Mul, line, proc, (true, true), (true, false))?,
                "div" => self.emit_pair(Opcode::Div, line, proc, (true, true), (true, false))?,
                "and" => self.emit_pair(Opcode::And, line, proc, (true, true), (true, false))?,
                "or" => self.emit_pair(Opcode::Or, line, proc, (true, true), (true, false))?,
                "xor" => self.emit_pair(Opcode::Xor, line, proc, (true, true), (true, false))?,
                "shr" => self.emit_pair(Opcode::Shr, line, proc, (true, true), (true, false))?,
                "shl" => self.emit_pair(Opcode::Shl, line, proc, (true, true), (true, false))?,
                "cmp" => self.emit_pair(Opcode::Cmp, line, proc, (true, false), (true, false))?,
                "jump" | "jumpn" | "jumpz" | "jumpl" | "jumpg" => {
                    let op = match first.as_str() {
                        "jump" => Opcode::Jump,
                        "jumpn" => Opcode::JumpN,
                        "jumpz" => Opcode::JumpZ,
                        "jumpl" => Opcode::JumpL,
                        _ => Opcode::JumpG,
                    };
                    let tokens = self.lines[line].tokens.clone();
                    if tokens.len() != 2 {
                        self.log_line(format_args!("{} takes a label.", op.mnemonic()));
                        return Err(CompileError::Codegen);
                    }
                    let target = self.pool.get(tokens[1]).to_string();
                    let dest = match self.find_label(proc, &target) {
                        Some(dest) => dest,
                        None => {
                            self.log_line(format_args!("Couldn't find label {}.", target));
                            return Err(CompileError::Codegen);
                        }
                    };
                    self.inst.extend_from_slice(&[op as Word, dest as Word]);
                }
                "call" => {
                    let tokens = self.lines[line].tokens.clone();
                    if tokens.len() < 2 {
                        self.log_line(format_args!(
                            "call takes a procedure and possible arguments."
                        ));
                        return Err(CompileError::Codegen);
                    }

                    let callee_name = self.pool.get(tokens[1]).to_string();
                    let callee = match self.find_procedure(&callee_name) {
                        Some(callee) => callee,
                        None => {
                            self.log_line(format_args!(
                                "Couldn't find procedure {}.",
                                callee_name
                            ));
                            return Err(CompileError::Codegen);
                        }
                    };

                    let args = tokens.len() - 2;
                    if args != self.procs[callee].args {
                        let expected = self.procs[callee].args;
                        self.log_line(format_args!(
                            "Procedure {} takes {} args, {} given.",
                            callee_name, expected, args
                        ));
                        return Err(CompileError::Codegen);
                    }

                    self.inst
                        .extend_from_slice(&[Opcode::Call as Word, callee as Word]);
                    for &actual in &tokens[2..] {
                        let (flags, val, index) =
                            self.populate_var(actual, Some(proc), false, false)?;
                        self.inst.extend_from_slice(&[flags, val, index]);
                    }
                }
                "ret" => {
                    if self.lines[line].tokens.len() != 1 {
                        self.log_line(format_args!("ret takes no arguments."));
                        return Err(CompileError::Codegen);
                    }
                    self.inst.push(Opcode::Ret as Word);
                    procnum += 1;
                    curproc = None;
                }
                other => {
                    self.log_line(format_args!("Invalid instruction mnemonic: {}", other));
                    return Err(CompileError::Codegen);
                }
            }
        }

        // rewrite jump operands from line numbers to instruction offsets
        for line in 0..self.lines.len() {
            self.logline = line;
            let at = self.lines[line].instruction;
            match Opcode::from_i32(self.inst[at]) {
                Some(Opcode::Jump)
                | Some(Opcode::JumpN)
                | Some(Opcode::JumpZ)
                | Some(Opcode::JumpL)
                | Some(Opcode::JumpG) => {
                    let target = self.inst[at + JUMP_LOCATION] as usize;
                    if target >= self.lines.len() {
                        self.log_line(format_args!("BUG: jump to a line out of range."));
                        return Err(CompileError::Codegen);
                    }
                    debug_assert_matches!(
                        Opcode::from_i32(self.inst[self.lines[target].instruction]),
                        Some(_)
                    );
                    self.inst[at + JUMP_LOCATION] = self.lines[target].instruction as Word;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Diagnostic context for instruction stream verification: the stage
/// tag plus the source line, when one is known.
pub(crate) struct VerifyContext<'a> {
    pub log: &'a mut dyn LogSink,
    pub stage: &'static str,
    pub line: Option<(String, u32)>,
}

impl<'a> VerifyContext<'a> {
    fn fault(&mut self, args: fmt::Arguments) {
        match &self.line {
            Some((module, line)) => self
                .log
                .log(format_args!("{}:{}:{}: {}\n", self.stage, module, line, args)),
            None => self.log.log(format_args!("{}: {}\n", self.stage, args)),
        }
    }
}

impl Program {
    pub(crate) fn code_verify(&self, log: &mut dyn LogSink) -> Result<(), CompileError> {
        let mut curproc: Option<usize> = None;
        let mut procnum = 0;
        let mut logline = 0;
        let mut at = 0;

        while at < self.inst.len() {
            let mut ctx = VerifyContext {
                log: &mut *log,
                stage: "code verification",
                line: self.lines.get(logline).map(|l| {
                    (self.pool.get(l.module).to_string(), l.line)
                }),
            };

            if curproc.is_none() {
                if procnum < self.procs.len() && logline == self.procs[procnum].start {
                    curproc = Some(procnum);
                    procnum += 1;
                } else {
                    ctx.fault(format_args!("BUG: code line not in a procedure."));
                    return Err(CompileError::CodeVerify);
                }
            }

            let size = self
                .check_instruction(&mut curproc, at, &mut ctx)
                .map_err(|_| CompileError::CodeVerify)?;
            at += size;
            logline += 1;
        }

        if curproc.is_some() {
            log.log(format_args!("code verification: Procedure without ret?\n"));
            return Err(CompileError::CodeVerify);
        }

        Ok(())
    }

    /// Checks one instruction and returns how many words it spans.
    pub(crate) fn check_instruction(
        &self,
        proc: &mut Option<usize>,
        at: usize,
        ctx: &mut VerifyContext,
    ) -> Result<usize, ()> {
        let op = match Opcode::from_i32(self.inst[at]) {
            Some(op) => op,
            None => {
                ctx.fault(format_args!("Invalid instruction {}.", self.inst[at]));
                return Err(());
            }
        };

        match op {
            Opcode::Move
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shr
            | Opcode::Shl
            | Opcode::Cmp => {
                if at + MOVE_ARGS > self.inst.len() - 1 {
                    ctx.fault(format_args!(
                        "Instruction memory ends before end of {} instruction.",
                        op.mnemonic()
                    ));
                    return Err(());
                }
                let dest_written = op != Opcode::Cmp;
                self.check_move_arg(
                    dest_written,
                    self.inst[at + MOVE_DEST_FLAGS],
                    self.inst[at + MOVE_DEST_VAL],
                    self.inst[at + MOVE_DEST_INDEX],
                    ctx,
                )?;
                self.check_move_arg(
                    false,
                    self.inst[at + MOVE_SRC_FLAGS],
                    self.inst[at + MOVE_SRC_VAL],
                    self.inst[at + MOVE_SRC_INDEX],
                    ctx,
                )?;
                Ok(MOVE_ARGS + 1)
            }
            Opcode::Jump | Opcode::JumpN | Opcode::JumpZ | Opcode::JumpL | Opcode::JumpG => {
                self.check_jump_instruction(op, *proc, at, ctx)?;
                Ok(JUMP_ARGS + 1)
            }
            Opcode::Call => {
                if at + CALL_PROCEDURE > self.inst.len() - 1 {
                    ctx.fault(format_args!(
                        "Instruction memory ends before end of call instruction."
                    ));
                    return Err(());
                }

                let callee = self.inst[at + CALL_PROCEDURE];
                if callee < 0 || callee > self.procs.len() as Word - 1 {
                    ctx.fault(format_args!("Call to procedure out of range."));
                    return Err(());
                }
                let args = self.procs[callee as usize].args;

                if at + CALL_PROCEDURE + args * CALL_ARG_SIZE > self.inst.len() - 1 {
                    ctx.fault(format_args!(
                        "Instruction memory ends before end of call arguments."
                    ));
                    return Err(());
                }

                for arg in 0..args {
                    let base = at + CALL_START_ARGS + arg * CALL_ARG_SIZE;
                    self.check_move_arg(
                        false,
                        self.inst[base + CALL_ARG_FLAGS],
                        self.inst[base + CALL_ARG_VAL],
                        self.inst[base + CALL_ARG_INDEX],
                        ctx,
                    )?;
                }

                Ok(CALL_PROCEDURE + args * CALL_ARG_SIZE + 1)
            }
            Opcode::Ret => {
                *proc = None;
                Ok(RET_ARGS + 1)
            }
        }
    }

    fn check_move_arg(
        &self,
        dest: bool,
        flags: Word,
        val: Word,
        index: Word,
        ctx: &mut VerifyContext,
    ) -> Result<(), ()> {
        match flags & MOVE_FLAG_TYPE_MASK {
            MOVE_FLAG_IMMEDIATE => {
                if dest {
                    ctx.fault(format_args!("Destination flagged as immediate."));
                    return Err(());
                }
            }
            MOVE_FLAG_LENGTH => {
                if dest {
                    ctx.fault(format_args!("Destination flagged as array length."));
                    return Err(());
                }
                if val < 0 || val > self.vars.len() as Word - 1 {
                    ctx.fault(format_args!("Var out of range ({}).", val));
                    return Err(());
                }
            }
            MOVE_FLAG_VAR => {
                if val < 0 || val > self.vars.len() as Word - 1 {
                    ctx.fault(format_args!("Var out of range ({}).", val));
                    return Err(());
                }
                if index < 0 {
                    ctx.fault(format_args!("Negative index {}.", index));
                    return Err(());
                }

                let var = &self.vars[val as usize];
                if dest {
                    if var.read_only() {
                        ctx.fault(format_args!(
                            "Read only callback variable as destination ({}).",
                            self.pool.get(var.name)
                        ));
                        return Err(());
                    }
                } else if var.write_only() {
                    ctx.fault(format_args!(
                        "Write only callback variable as source ({}).",
                        self.pool.get(var.name)
                    ));
                    return Err(());
                }

                if flags & MOVE_FLAG_INDEX_TYPE_MASK == MOVE_FLAG_INDEX_VAR {
                    if index > self.vars.len() as Word - 1 {
                        ctx.fault(format_args!("Index var out of range ({}).", index));
                        return Err(());
                    }
                    let index_var = &self.vars[index as usize];
                    if index_var.write_only() {
                        ctx.fault(format_args!(
                            "Write only callback variable as index ({}).",
                            self.pool.get(index_var.name)
                        ));
                        return Err(());
                    }
                } else if var.length > 0 && index > var.length as Word - 1 {
                    ctx.fault(format_args!("Index out of range {}.", index));
                    return Err(());
                }
            }
            _ => {
                ctx.fault(format_args!("Invalid variable type."));
                return Err(());
            }
        }

        Ok(())
    }

    fn check_jump_instruction(
        &self,
        op: Opcode,
        proc: Option<usize>,
        at: usize,
        ctx: &mut VerifyContext,
    ) -> Result<(), ()> {
        if at + JUMP_ARGS > self.inst.len() - 1 {
            ctx.fault(format_args!(
                "Instruction memory ends before end of {} instruction.",
                op.mnemonic()
            ));
            return Err(());
        }

        let target = self.inst[at + JUMP_LOCATION];
        if target < 0 {
            ctx.fault(format_args!("Negative jump pointer?"));
            return Err(());
        }

        let line = match self
            .lines
            .iter()
            .position(|l| l.instruction == target as usize)
        {
            Some(line) => line,
            None => {
                ctx.fault(format_args!("Jump argument doesn't land on an instruction."));
                return Err(());
            }
        };

        if let Some(p) = proc {
            let proc = &self.procs[p];
            if line < proc.start || line > proc.start + proc.length {
                ctx.fault(format_args!("Jump outside of procedure."));
                return Err(());
            }
        }

        Ok(())
    }
}
