//! The stack-based interpreter.
//!
//! All mutable run-time state lives in an [`Execution`]: the runtime
//! stack (one byte buffer holding globals and call frames), the call
//! stack, the stack/instruction pointers, and the last-result register
//! consulted by conditional jumps.  A `Machine` binds an execution to
//! its immutable [`Program`] and the embedder's callback table for the
//! duration of one operation.
//!
//! Procedure arguments are passed by reference: a call writes a
//! four-word slot {flags, val, index, ptr} per actual, and operands
//! naming a by-reference argument resolve through the slot before any
//! memory access.  Everything the verifier already proved is taken on
//! faith here; anything that still goes wrong surfaces as a [`Status`],
//! never as a panic or abort of the host.

use byteorder::ByteOrder;
use num_traits::FromPrimitive;
use std::fmt;

use crate::callback::{Callback, Handlers, ValueType};
use crate::codegen::VerifyContext;
use crate::constants::{DEFAULT_CALLSTACK_SIZE, FLOAT_SIZE, INT_SIZE, STACK_ARG_SIZE};
use crate::error::RuntimeError;
use crate::instructions::*;
use crate::log::LogSink;
use crate::program::Program;
use crate::symbols::Init;
use crate::{Endian, Word};

/// Run-time status of a VM, as reported by `step`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Ready = 0,
    Active = 1,
    InternalError = 2,
    OutOfRange = 3,
    InvalidInstruction = 4,
    StackOverflow = 5,
    CallbackFailed = 6,
    FloatAsIndex = 7,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ready => "Ready",
            Status::Active => "Active",
            Status::InternalError => "Internal error/VM bug",
            Status::OutOfRange => "Array access out of range",
            Status::InvalidInstruction => "Invalid instruction",
            Status::StackOverflow => "Stack overflow",
            Status::CallbackFailed => "Callback returned failure",
            Status::FloatAsIndex => "Float used as index",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy)]
struct CallFrame {
    /// Instruction to return to.
    ip: usize,
    /// Procedure that was called.
    proc: usize,
}

/// A scalar fetched from memory, a callback, or an immediate.
#[derive(Clone, Copy)]
enum Value {
    Int(i32),
    Float(f64),
}

/// Result of the most recent arithmetic or `cmp`, typed so a
/// conditional jump knows which scalar to compare against zero.
struct ResultReg {
    vtype: ValueType,
    int: i32,
    float: f64,
}

/// One resolved or unresolved operand descriptor.
#[derive(Clone, Copy)]
struct Ref {
    flags: Word,
    val: Word,
    index: Word,
    ptr: usize,
}

/// A stack argument slot as stored on the runtime stack.
#[derive(Clone, Copy)]
struct StackArg {
    flags: Word,
    val: Word,
    index: Word,
    ptr: Word,
}

/// Mutable run-time state.  Multiple executions may share one program.
pub struct Execution {
    stack: Vec<u8>,
    cstack: Vec<CallFrame>,
    callstacksize: usize,
    sp: usize,
    ip: usize,
    result: ResultReg,
    status: Status,
}

impl Execution {
    /// Allocates the runtime and call stacks for `program`.  A
    /// `callstacksize` of 0 selects the default depth of 256.
    pub fn new(program: &Program, callstacksize: usize) -> Execution {
        let callstacksize = if callstacksize == 0 {
            DEFAULT_CALLSTACK_SIZE
        } else {
            callstacksize
        };
        let mut exec = Execution {
            stack: vec![0; program.stacksize],
            cstack: Vec::with_capacity(callstacksize),
            callstacksize,
            sp: 0,
            ip: 0,
            result: ResultReg {
                vtype: ValueType::Int,
                int: 0,
                float: 0.0,
            },
            status: Status::Ready,
        };
        exec.reset(program);
        exec
    }

    /// Reinitializes every global from its static initializer and
    /// returns the status to Ready.  Code is untouched.
    pub fn reset(&mut self, program: &Program) {
        for var in &program.vars {
            if !var.is_global() || var.is_callback() {
                continue;
            }
            let at = var.offset;
            match &var.init {
                Some(Init::Bytes(bytes)) => {
                    if let Some(dst) = self.stack.get_mut(at..at + bytes.len()) {
                        dst.copy_from_slice(bytes);
                    }
                }
                Some(Init::Ints(values)) => {
                    for (i, &value) in values.iter().enumerate() {
                        let at = at + i * INT_SIZE;
                        if let Some(dst) = self.stack.get_mut(at..at + INT_SIZE) {
                            Endian::write_i32(dst, value);
                        }
                    }
                }
                Some(Init::Floats(values)) => {
                    for (i, &value) in values.iter().enumerate() {
                        let at = at + i * FLOAT_SIZE;
                        if let Some(dst) = self.stack.get_mut(at..at + FLOAT_SIZE) {
                            Endian::write_f64(dst, value);
                        }
                    }
                }
                None => {}
            }
        }
        self.status = Status::Ready;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Starts the named zero-argument procedure on this execution.
    pub fn begin(
        &mut self,
        program: &Program,
        callbacks: &mut [Callback],
        log: &mut dyn LogSink,
        name: &str,
    ) -> Result<(), RuntimeError> {
        Machine {
            prog: program,
            exec: self,
            callbacks,
            log,
            trace: false,
        }
        .begin(name)
    }

    /// Processes exactly one instruction.
    pub fn step(
        &mut self,
        program: &Program,
        callbacks: &mut [Callback],
        log: &mut dyn LogSink,
    ) -> Status {
        Machine {
            prog: program,
            exec: self,
            callbacks,
            log,
            trace: false,
        }
        .step()
    }
}

/// One execution bound to its program and callbacks.
pub(crate) struct Machine<'a> {
    pub prog: &'a Program,
    pub exec: &'a mut Execution,
    pub callbacks: &'a mut [Callback],
    pub log: &'a mut dyn LogSink,
    pub trace: bool,
}

impl<'a> Machine<'a> {
    pub(crate) fn begin(&mut self, name: &str) -> Result<(), RuntimeError> {
        if self.exec.status != Status::Ready {
            self.log.log(format_args!(
                "runtime init: Cannot start running, status is not ready.\n"
            ));
            return Err(RuntimeError::NotReady);
        }

        let procnum = match self.prog.find_procedure(name) {
            Some(procnum) => procnum,
            None => {
                self.log.log(format_args!(
                    "runtime init: Couldn't find procedure: {}\n",
                    name
                ));
                return Err(RuntimeError::UnknownProcedure(name.to_string()));
            }
        };
        if self.prog.procs[procnum].args > 0 {
            self.log.log(format_args!(
                "runtime init: Can't enter from procedure with arguments.\n"
            ));
            return Err(RuntimeError::EntrypointArgs(name.to_string()));
        }

        self.exec.ip = 0;
        self.exec.sp = self.prog.initialstack;
        self.exec.cstack.clear();
        self.exec.result = ResultReg {
            vtype: ValueType::Int,
            int: 0,
            float: 0.0,
        };

        if let Err(status) = self.call(procnum, 0) {
            self.exec.status = status;
            self.log.log(format_args!(
                "runtime init: Failed to call procedure {}: {}\n",
                name, status
            ));
            return Err(RuntimeError::Faulted(status));
        }

        self.exec.status = Status::Active;
        Ok(())
    }

    pub(crate) fn step(&mut self) -> Status {
        if self.exec.status != Status::Active {
            return self.exec.status;
        }

        if self.trace {
            let mut ctx = VerifyContext {
                log: &mut *self.log,
                stage: "trace",
                line: None,
            };
            let mut proc = None;
            if self
                .prog
                .check_instruction(&mut proc, self.exec.ip, &mut ctx)
                .is_err()
            {
                self.exec.status = Status::InvalidInstruction;
                return self.exec.status;
            }
        }

        if let Err(status) = self.dispatch() {
            self.exec.status = status;
        }
        self.exec.status
    }

    fn dispatch(&mut self) -> Result<(), Status> {
        let op = Opcode::from_i32(self.word(self.exec.ip)?)
            .ok_or(Status::InvalidInstruction)?;
        match op {
            Opcode::Move => self.exec_move(),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => self.exec_arith(op),
            Opcode::And | Opcode::Or | Opcode::Xor => self.exec_logic(op),
            Opcode::Shr | Opcode::Shl => self.exec_shift(op),
            Opcode::Cmp => self.exec_cmp(),
            Opcode::Jump => self.exec_jump(),
            Opcode::JumpN | Opcode::JumpZ | Opcode::JumpL | Opcode::JumpG => {
                self.exec_cond_jump(op)
            }
            Opcode::Call => {
                let ip = self.exec.ip;
                let procindex = self.word(ip + CALL_PROCEDURE)? as usize;
                self.call(procindex, ip + CALL_START_ARGS)
            }
            Opcode::Ret => self.exec_ret(),
        }
    }

    /* instruction stream and stack access */

    fn word(&self, at: usize) -> Result<Word, Status> {
        self.prog.inst.get(at).copied().ok_or(Status::InternalError)
    }

    fn load_int(&self, at: usize) -> Result<i32, Status> {
        let slice = self
            .exec
            .stack
            .get(at..at + INT_SIZE)
            .ok_or(Status::InternalError)?;
        Ok(Endian::read_i32(slice))
    }

    fn store_int(&mut self, at: usize, value: i32) -> Result<(), Status> {
        let slice = self
            .exec
            .stack
            .get_mut(at..at + INT_SIZE)
            .ok_or(Status::InternalError)?;
        Endian::write_i32(slice, value);
        Ok(())
    }

    fn load_float(&self, at: usize) -> Result<f64, Status> {
        let slice = self
            .exec
            .stack
            .get(at..at + FLOAT_SIZE)
            .ok_or(Status::InternalError)?;
        Ok(Endian::read_f64(slice))
    }

    fn store_float(&mut self, at: usize, value: f64) -> Result<(), Status> {
        let slice = self
            .exec
            .stack
            .get_mut(at..at + FLOAT_SIZE)
            .ok_or(Status::InternalError)?;
        Endian::write_f64(slice, value);
        Ok(())
    }

    fn load_byte(&self, at: usize) -> Result<u8, Status> {
        self.exec.stack.get(at).copied().ok_or(Status::InternalError)
    }

    fn store_byte(&mut self, at: usize, value: u8) -> Result<(), Status> {
        *self.exec.stack.get_mut(at).ok_or(Status::InternalError)? = value;
        Ok(())
    }

    /// The argument slot `slot` slots below `base`.
    fn stack_arg(&self, base: usize, slot: usize) -> Result<StackArg, Status> {
        let at = base
            .checked_sub(slot * STACK_ARG_SIZE)
            .ok_or(Status::InternalError)?;
        Ok(StackArg {
            flags: self.load_int(at)?,
            val: self.load_int(at + INT_SIZE)?,
            index: self.load_int(at + 2 * INT_SIZE)?,
            ptr: self.load_int(at + 3 * INT_SIZE)?,
        })
    }

    fn write_stack_arg(&mut self, base: usize, slot: usize, arg: StackArg) -> Result<(), Status> {
        let at = base
            .checked_sub(slot * STACK_ARG_SIZE)
            .ok_or(Status::InternalError)?;
        self.store_int(at, arg.flags)?;
        self.store_int(at + INT_SIZE, arg.val)?;
        self.store_int(at + 2 * INT_SIZE, arg.index)?;
        self.store_int(at + 3 * INT_SIZE, arg.ptr)
    }

    /// Memory offset of a variable's storage: its global offset, or
    /// `sp - offset` for locals.
    fn get_ptr(&self, var: usize, sp: usize) -> Result<usize, Status> {
        let var = &self.prog.vars[var];
        if var.is_global() {
            Ok(var.offset)
        } else {
            sp.checked_sub(var.offset).ok_or(Status::InternalError)
        }
    }

    fn var_at(&self, index: Word) -> Result<&crate::symbols::Variable, Status> {
        self.prog
            .vars
            .get(index as usize)
            .ok_or(Status::InternalError)
    }

    /* variable access, through memory or callbacks */

    fn read_var(&mut self, ptr: usize, var: usize, index: Word) -> Result<Value, Status> {
        let prog = self.prog;
        let meta = prog.vars.get(var).ok_or(Status::InternalError)?;

        if let Some(cb) = meta.callback {
            let cb = self.callbacks.get_mut(cb).ok_or(Status::InternalError)?;
            let index = index as u32;
            return match &mut cb.handlers {
                Handlers::Byte { read: Some(f), .. } => f(index)
                    .map(|v| Value::Int(i32::from(v)))
                    .map_err(|_| Status::CallbackFailed),
                Handlers::Int { read: Some(f), .. } => {
                    f(index).map(Value::Int).map_err(|_| Status::CallbackFailed)
                }
                Handlers::Float { read: Some(f), .. } => f(index)
                    .map(Value::Float)
                    .map_err(|_| Status::CallbackFailed),
                _ => Err(Status::InternalError),
            };
        }

        let index = index as usize;
        match meta.vtype {
            ValueType::Byte => Ok(Value::Int(i32::from(self.load_byte(ptr + index)?))),
            ValueType::Int => Ok(Value::Int(self.load_int(ptr + index * INT_SIZE)?)),
            ValueType::Float => Ok(Value::Float(self.load_float(ptr + index * FLOAT_SIZE)?)),
        }
    }

    fn write_var(
        &mut self,
        intval: i32,
        floatval: f64,
        ptr: usize,
        var: usize,
        index: Word,
    ) -> Result<(), Status> {
        let prog = self.prog;
        let meta = prog.vars.get(var).ok_or(Status::InternalError)?;

        if let Some(cb) = meta.callback {
            let cb = self.callbacks.get_mut(cb).ok_or(Status::InternalError)?;
            let index = index as u32;
            return match &mut cb.handlers {
                Handlers::Byte { write: Some(f), .. } => {
                    f(intval as u8, index).map_err(|_| Status::CallbackFailed)
                }
                Handlers::Int { write: Some(f), .. } => {
                    f(intval, index).map_err(|_| Status::CallbackFailed)
                }
                Handlers::Float { write: Some(f), .. } => {
                    f(floatval, index).map_err(|_| Status::CallbackFailed)
                }
                _ => Err(Status::InternalError),
            };
        }

        let index = index as usize;
        match meta.vtype {
            ValueType::Byte => self.store_byte(ptr + index, intval as u8),
            ValueType::Int => self.store_int(ptr + index * INT_SIZE, intval),
            ValueType::Float => self.store_float(ptr + index * FLOAT_SIZE, floatval),
        }
    }

    /* argument reference resolution */

    /// Resolves an operand's index field to a concrete array index:
    /// either the immediate value, or the integer read from the index
    /// variable (itself resolved through its argument slot if needed).
    fn resolved_index(&mut self, flags: Word, index: Word, sp: usize) -> Result<Word, Status> {
        if flags & MOVE_FLAG_INDEX_TYPE_MASK != MOVE_FLAG_INDEX_VAR {
            return Ok(index);
        }

        let (is_arg, offset) = {
            let v = self.var_at(index)?;
            (v.is_argument(), v.offset)
        };

        let value = if is_arg {
            let slot = self.stack_arg(sp, offset)?;
            if slot.flags & MOVE_FLAG_TYPE_MASK == MOVE_FLAG_VAR {
                if self.var_at(slot.val)?.vtype == ValueType::Float {
                    return Err(Status::FloatAsIndex);
                }
                self.read_var(slot.ptr as usize, slot.val as usize, slot.index)?
            } else {
                // the actual was an immediate
                Value::Int(slot.val)
            }
        } else {
            if self.var_at(index)?.vtype == ValueType::Float {
                return Err(Status::FloatAsIndex);
            }
            let ptr = self.get_ptr(index as usize, sp)?;
            self.read_var(ptr, index as usize, 0)?
        };

        match value {
            Value::Int(value) => Ok(value),
            Value::Float(_) => Err(Status::FloatAsIndex),
        }
    }

    /// Resolves a source operand in place.  The result is either an
    /// immediate (from a literal, a length-of, or an argument whose
    /// actual was immediate) or a concrete variable access with its
    /// final index and memory offset.
    fn update_src_ref(&mut self, r: &mut Ref) -> Result<(), Status> {
        let sp = self.exec.sp;
        match r.flags & MOVE_FLAG_TYPE_MASK {
            MOVE_FLAG_VAR => {
                let (is_arg, offset) = {
                    let v = self.var_at(r.val)?;
                    (v.is_argument(), v.offset)
                };
                if is_arg {
                    let slot = self.stack_arg(sp, offset)?;
                    if slot.flags & MOVE_FLAG_TYPE_MASK == MOVE_FLAG_VAR {
                        let mut index = self.resolved_index(r.flags, r.index, sp)?;
                        if index < 0 {
                            return Err(Status::OutOfRange);
                        }
                        // indices into a sliced argument are relative
                        // to the actual's own index
                        index = index.wrapping_add(slot.index);
                        let length = self.var_at(slot.val)?.length as Word;
                        if index > length - 1 {
                            return Err(Status::OutOfRange);
                        }
                        r.flags = MOVE_FLAG_VAR;
                        r.val = slot.val;
                        r.index = index;
                        r.ptr = slot.ptr as usize;
                    } else {
                        let index = self.resolved_index(r.flags, r.index, sp)?;
                        if index != 0 {
                            return Err(Status::OutOfRange);
                        }
                        r.flags = MOVE_FLAG_IMMEDIATE;
                        r.val = slot.val;
                    }
                } else {
                    let index = self.resolved_index(r.flags, r.index, sp)?;
                    let length = self.var_at(r.val)?.length as Word;
                    if index < 0 || index > length - 1 {
                        return Err(Status::OutOfRange);
                    }
                    r.flags = MOVE_FLAG_VAR;
                    r.index = index;
                    r.ptr = self.get_ptr(r.val as usize, sp)?;
                }
                Ok(())
            }
            MOVE_FLAG_LENGTH => {
                let (is_arg, offset) = {
                    let v = self.var_at(r.val)?;
                    (v.is_argument(), v.offset)
                };
                if is_arg {
                    let slot = self.stack_arg(sp, offset)?;
                    if slot.flags & MOVE_FLAG_TYPE_MASK == MOVE_FLAG_VAR {
                        // length of a sliced actual counts from its
                        // index to the end
                        r.flags = MOVE_FLAG_IMMEDIATE;
                        r.index = slot.index;
                        r.val = self.var_at(slot.val)?.length as Word - slot.index;
                    } else {
                        r.flags = MOVE_FLAG_IMMEDIATE;
                        r.val = 1;
                    }
                } else {
                    let length = self.var_at(r.val)?.length as Word;
                    r.flags = MOVE_FLAG_IMMEDIATE;
                    r.val = length;
                }
                Ok(())
            }
            MOVE_FLAG_IMMEDIATE => {
                r.flags = MOVE_FLAG_IMMEDIATE;
                Ok(())
            }
            _ => Err(Status::InternalError),
        }
    }

    /// Resolves a destination operand in place.  Always lands on a
    /// writable variable access; writing to an argument whose actual
    /// was an immediate targets the slot's value word, so later reads
    /// of that argument observe the write.
    fn update_dest_ref(&mut self, r: &mut Ref) -> Result<(), Status> {
        let sp = self.exec.sp;
        match r.flags & MOVE_FLAG_TYPE_MASK {
            MOVE_FLAG_VAR => {
                let (is_arg, offset) = {
                    let v = self.var_at(r.val)?;
                    (v.is_argument(), v.offset)
                };
                if is_arg {
                    let slot = self.stack_arg(sp, offset)?;
                    if slot.flags & MOVE_FLAG_TYPE_MASK == MOVE_FLAG_VAR {
                        let mut index = self.resolved_index(r.flags, r.index, sp)?;
                        if index < 0 {
                            return Err(Status::OutOfRange);
                        }
                        index = index.wrapping_add(slot.index);
                        let length = self.var_at(slot.val)?.length as Word;
                        if index > length - 1 {
                            return Err(Status::OutOfRange);
                        }
                        r.val = slot.val;
                        r.index = index;
                        r.ptr = slot.ptr as usize;
                    } else {
                        let index = self.resolved_index(r.flags, r.index, sp)?;
                        if index != 0 {
                            return Err(Status::OutOfRange);
                        }
                        // target the slot's val word; the argument
                        // variable is a plain int so the write lands
                        // there with index 0
                        r.index = 0;
                        r.ptr = sp
                            .checked_sub(offset * STACK_ARG_SIZE)
                            .ok_or(Status::InternalError)?
                            + INT_SIZE;
                    }
                } else {
                    let index = self.resolved_index(r.flags, r.index, sp)?;
                    let length = self.var_at(r.val)?.length as Word;
                    if index < 0 || index > length - 1 {
                        return Err(Status::OutOfRange);
                    }
                    r.index = index;
                    r.ptr = self.get_ptr(r.val as usize, sp)?;
                }
                r.flags = MOVE_FLAG_VAR;
                Ok(())
            }
            _ => Err(Status::InternalError),
        }
    }

    /// Loads the value a resolved source reference denotes.
    fn fetch_val(&mut self, r: &Ref) -> Result<Value, Status> {
        if r.flags & MOVE_FLAG_TYPE_MASK == MOVE_FLAG_VAR {
            self.read_var(r.ptr, r.val as usize, r.index)
        } else {
            Ok(Value::Int(r.val))
        }
    }

    /// Writes the result register through a resolved destination.
    fn store_result(&mut self, r: &Ref) -> Result<(), Status> {
        let (int, float) = (self.exec.result.int, self.exec.result.float);
        self.write_var(int, float, r.ptr, r.val as usize, r.index)
    }

    fn operand_refs(&mut self) -> Result<(Ref, Ref), Status> {
        let ip = self.exec.ip;
        let sp = self.exec.sp;
        let dest = Ref {
            flags: self.word(ip + MOVE_DEST_FLAGS)?,
            val: self.word(ip + MOVE_DEST_VAL)?,
            index: self.word(ip + MOVE_DEST_INDEX)?,
            ptr: sp,
        };
        let src = Ref {
            flags: self.word(ip + MOVE_SRC_FLAGS)?,
            val: self.word(ip + MOVE_SRC_VAL)?,
            index: self.word(ip + MOVE_SRC_INDEX)?,
            ptr: sp,
        };
        Ok((dest, src))
    }

    /// Loads a value into the result register without retagging it.
    fn fetch_into_result(&mut self, r: &Ref) -> Result<(), Status> {
        match self.fetch_val(r)? {
            Value::Int(v) => self.exec.result.int = v,
            Value::Float(v) => self.exec.result.float = v,
        }
        Ok(())
    }

    fn src_is_float(&self, r: &Ref) -> Result<bool, Status> {
        Ok(r.flags == MOVE_FLAG_VAR && self.var_at(r.val)?.vtype == ValueType::Float)
    }

    /* instruction semantics */

    fn exec_move(&mut self) -> Result<(), Status> {
        let (mut dest, mut src) = self.operand_refs()?;
        self.update_dest_ref(&mut dest)?;
        self.update_src_ref(&mut src)?;
        self.fetch_into_result(&src)?;

        let dest_float = self.var_at(dest.val)?.vtype == ValueType::Float;
        if src.flags == MOVE_FLAG_VAR {
            let src_float = self.var_at(src.val)?.vtype == ValueType::Float;
            if src_float && !dest_float {
                self.exec.result.int = self.exec.result.float as i32;
                self.exec.result.vtype = ValueType::Int;
            } else if !src_float && dest_float {
                self.exec.result.float = f64::from(self.exec.result.int);
                self.exec.result.vtype = ValueType::Float;
            }
            // same type either side: no conversion, tag untouched
        } else if dest_float {
            // immediates can only be ints
            self.exec.result.float = f64::from(self.exec.result.int);
            self.exec.result.vtype = ValueType::Float;
        }

        self.store_result(&dest)?;
        self.exec.ip += MOVE_ARGS + 1;
        Ok(())
    }

    fn exec_arith(&mut self, op: Opcode) -> Result<(), Status> {
        let (mut dest, mut src) = self.operand_refs()?;
        self.update_dest_ref(&mut dest)?;
        self.update_src_ref(&mut src)?;

        let (mut int_op, mut float_op) = (0i32, 0f64);
        match self.fetch_val(&src)? {
            Value::Int(v) => int_op = v,
            Value::Float(v) => float_op = v,
        }
        self.fetch_into_result(&dest)?;

        let src_float = self.src_is_float(&src)?;
        let dest_float = self.var_at(dest.val)?.vtype == ValueType::Float;

        match (src_float, dest_float) {
            (true, false) => {
                let value = arith_f(op, f64::from(self.exec.result.int), float_op)?;
                self.exec.result.int = value as i32;
                self.exec.result.vtype = ValueType::Int;
            }
            (false, true) => {
                self.exec.result.float =
                    arith_f(op, self.exec.result.float, f64::from(int_op))?;
                self.exec.result.vtype = ValueType::Float;
            }
            (true, true) => {
                self.exec.result.float = arith_f(op, self.exec.result.float, float_op)?;
                self.exec.result.vtype = ValueType::Float;
            }
            (false, false) => {
                self.exec.result.int = arith_i(op, self.exec.result.int, int_op)?;
                self.exec.result.vtype = ValueType::Int;
            }
        }

        self.store_result(&dest)?;
        self.exec.ip += MOVE_ARGS + 1;
        Ok(())
    }

    fn exec_logic(&mut self, op: Opcode) -> Result<(), Status> {
        let (mut dest, mut src) = self.operand_refs()?;
        self.update_dest_ref(&mut dest)?;
        self.update_src_ref(&mut src)?;

        let int_op = match self.fetch_val(&src)? {
            Value::Int(v) => v,
            // rejected below, but the fetch (and any read callback)
            // happens first
            Value::Float(_) => 0,
        };
        self.fetch_into_result(&dest)?;

        // bitwise ops are integer only, on both sides
        if self.src_is_float(&src)? || self.var_at(dest.val)?.vtype == ValueType::Float {
            return Err(Status::InvalidInstruction);
        }

        self.exec.result.int = match op {
            Opcode::And => self.exec.result.int & int_op,
            Opcode::Or => self.exec.result.int | int_op,
            _ => self.exec.result.int ^ int_op,
        };
        self.exec.result.vtype = ValueType::Int;

        self.store_result(&dest)?;
        self.exec.ip += MOVE_ARGS + 1;
        Ok(())
    }

    fn exec_shift(&mut self, op: Opcode) -> Result<(), Status> {
        let (mut dest, mut src) = self.operand_refs()?;
        self.update_dest_ref(&mut dest)?;
        self.update_src_ref(&mut src)?;

        let (mut int_op, mut float_op) = (0i32, 0f64);
        match self.fetch_val(&src)? {
            Value::Int(v) => int_op = v,
            Value::Float(v) => float_op = v,
        }
        self.fetch_into_result(&dest)?;

        if self.var_at(dest.val)?.vtype == ValueType::Float {
            return Err(Status::InvalidInstruction);
        }
        // the shift amount must be an integer; a double source is
        // truncated
        let amount = if self.src_is_float(&src)? {
            float_op as i32
        } else {
            int_op
        };

        self.exec.result.int = match op {
            Opcode::Shr => self.exec.result.int.wrapping_shr(amount as u32),
            _ => self.exec.result.int.wrapping_shl(amount as u32),
        };
        self.exec.result.vtype = ValueType::Int;

        self.store_result(&dest)?;
        self.exec.ip += MOVE_ARGS + 1;
        Ok(())
    }

    fn exec_cmp(&mut self) -> Result<(), Status> {
        let (mut dest, mut src) = self.operand_refs()?;
        // the destination is never written, so both sides resolve as
        // sources (immediates and length-ofs allowed)
        self.update_src_ref(&mut dest)?;
        self.update_src_ref(&mut src)?;

        let (mut int_op, mut float_op) = (0i32, 0f64);
        match self.fetch_val(&src)? {
            Value::Int(v) => int_op = v,
            Value::Float(v) => float_op = v,
        }
        self.fetch_into_result(&dest)?;

        let src_float = self.src_is_float(&src)?;
        let dest_float = self.src_is_float(&dest)?;

        match (src_float, dest_float) {
            (true, false) => {
                self.exec.result.int =
                    (f64::from(self.exec.result.int) - float_op) as i32;
                self.exec.result.vtype = ValueType::Int;
            }
            (false, true) => {
                self.exec.result.float -= f64::from(int_op);
                self.exec.result.vtype = ValueType::Float;
            }
            (true, true) => {
                self.exec.result.float -= float_op;
                self.exec.result.vtype = ValueType::Float;
            }
            (false, false) => {
                self.exec.result.int = self.exec.result.int.wrapping_sub(int_op);
                self.exec.result.vtype = ValueType::Int;
            }
        }

        self.exec.ip += MOVE_ARGS + 1;
        Ok(())
    }

    fn exec_jump(&mut self) -> Result<(), Status> {
        let target = self.word(self.exec.ip + JUMP_LOCATION)? as usize;
        // jump to self means nothing more can happen
        if target == self.exec.ip {
            self.exec.status = Status::Ready;
            return Ok(());
        }
        self.exec.ip = target;
        Ok(())
    }

    fn exec_cond_jump(&mut self, op: Opcode) -> Result<(), Status> {
        let taken = match self.exec.result.vtype {
            ValueType::Float => {
                let v = self.exec.result.float;
                match op {
                    Opcode::JumpN => v != 0.0,
                    Opcode::JumpZ => v == 0.0,
                    Opcode::JumpL => v < 0.0,
                    _ => v > 0.0,
                }
            }
            _ => {
                let v = self.exec.result.int;
                match op {
                    Opcode::JumpN => v != 0,
                    Opcode::JumpZ => v == 0,
                    Opcode::JumpL => v < 0,
                    _ => v > 0,
                }
            }
        };

        if taken {
            self.exec_jump()
        } else {
            self.exec.ip += JUMP_ARGS + 1;
            Ok(())
        }
    }

    /// Pushes a frame, resolves and stores each actual argument's slot,
    /// initializes the callee's locals, and enters the callee.
    fn call(&mut self, procindex: usize, argsindex: usize) -> Result<(), Status> {
        let prog = self.prog;

        if self.exec.cstack.len() == self.exec.callstacksize {
            return Err(Status::StackOverflow);
        }
        let callee = prog.procs.get(procindex).ok_or(Status::InternalError)?;
        let (args, stackneeded, entry) = (callee.args, callee.stackneeded, callee.instruction);
        if self.exec.sp + stackneeded > self.exec.stack.len() {
            return Err(Status::StackOverflow);
        }

        // the return address starts at the instruction after the call
        self.exec.cstack.push(CallFrame {
            ip: argsindex + args * CALL_ARG_SIZE,
            proc: procindex,
        });

        let sp = self.exec.sp;
        let newsp = sp + stackneeded;

        for arg in 0..args {
            let base = argsindex + arg * CALL_ARG_SIZE;
            let mut r = Ref {
                flags: self.word(base + CALL_ARG_FLAGS)?,
                val: self.word(base + CALL_ARG_VAL)?,
                index: self.word(base + CALL_ARG_INDEX)?,
                ptr: sp,
            };
            self.update_src_ref(&mut r)?;
            self.write_stack_arg(
                newsp,
                arg + 1,
                StackArg {
                    flags: r.flags,
                    val: r.val,
                    index: r.index,
                    ptr: r.ptr as Word,
                },
            )?;
        }

        let callee = &prog.procs[procindex];
        for &local in &callee.vars[args..] {
            let var = &prog.vars[local];
            let at = newsp
                .checked_sub(var.offset)
                .ok_or(Status::InternalError)?;
            match &var.init {
                Some(Init::Bytes(bytes)) => {
                    let dst = self
                        .exec
                        .stack
                        .get_mut(at..at + bytes.len())
                        .ok_or(Status::InternalError)?;
                    dst.copy_from_slice(bytes);
                }
                Some(Init::Ints(values)) => {
                    for (i, &value) in values.iter().enumerate() {
                        self.store_int(at + i * INT_SIZE, value)?;
                    }
                }
                Some(Init::Floats(values)) => {
                    for (i, &value) in values.iter().enumerate() {
                        self.store_float(at + i * FLOAT_SIZE, value)?;
                    }
                }
                None => {}
            }
        }

        self.exec.sp = newsp;
        self.exec.ip = entry;
        Ok(())
    }

    fn exec_ret(&mut self) -> Result<(), Status> {
        // returning from the initial call ends the run
        if self.exec.cstack.len() == 1 {
            self.exec.status = Status::Ready;
            return Ok(());
        }

        let frame = self.exec.cstack.pop().ok_or(Status::InternalError)?;
        let needed = self
            .prog
            .procs
            .get(frame.proc)
            .ok_or(Status::InternalError)?
            .stackneeded;
        self.exec.ip = frame.ip;
        self.exec.sp = self
            .exec
            .sp
            .checked_sub(needed)
            .ok_or(Status::InternalError)?;
        Ok(())
    }

    /// Logs the run-time state: the call stack top down with argument
    /// slots and locals, then the globals.
    pub(crate) fn debugtrace(&mut self, full: bool) {
        let prog = self.prog;
        let mut csp = self.exec.cstack.len();
        let mut sp = self.exec.sp;
        let mut ip = self.exec.ip;

        while csp > 0 {
            let frame = self.exec.cstack[csp - 1];
            let proc = match prog.procs.get(frame.proc) {
                Some(proc) => proc,
                None => break,
            };
            let proc_name = prog.pool.get(proc.name);

            match prog.lines.iter().find(|l| l.instruction == ip) {
                Some(line) => self.log.log(format_args!(
                    "{}: {}@{}:{}\n",
                    csp,
                    proc_name,
                    prog.pool.get(line.module),
                    line.line
                )),
                None => self.log.log(format_args!("{}: {}@invalid\n", csp, proc_name)),
            }

            for arg in 0..proc.args {
                let name = prog.pool.get(prog.vars[proc.vars[arg]].name);
                match self.stack_arg_for_trace(sp, arg + 1) {
                    Some(slot)
                        if slot.flags & MOVE_FLAG_TYPE_MASK == MOVE_FLAG_VAR
                            && prog.vars.get(slot.val as usize).is_some() =>
                    {
                        let target = &prog.vars[slot.val as usize];
                        let owner = match target.proc {
                            Some(p) => prog.pool.get(prog.procs[p].name),
                            None => "Global",
                        };
                        self.log.log(format_args!(
                            " {}: {} -> {}.{}@{}[{}]:{} {:X}\n",
                            arg,
                            name,
                            owner,
                            prog.pool.get(target.name),
                            slot.ptr,
                            target.length,
                            slot.index,
                            slot.flags
                        ));
                    }
                    Some(slot) if slot.flags & MOVE_FLAG_TYPE_MASK == MOVE_FLAG_IMMEDIATE => {
                        self.log.log(format_args!(
                            " {}: {} -> {} {:X}\n",
                            arg, name, slot.val, slot.flags
                        ));
                    }
                    Some(slot) => {
                        self.log
                            .log(format_args!(" {}: Invalid flags {:X}\n", arg, slot.flags));
                    }
                    None => {
                        self.log.log(format_args!(" {}: <bad slot>\n", arg));
                    }
                }
            }

            for slot in proc.args..proc.vars.len() {
                let var = &prog.vars[proc.vars[slot]];
                let at = sp.saturating_sub(var.offset);
                self.log.log(format_args!(
                    " {}: {}@{}[{}]",
                    slot,
                    prog.pool.get(var.name),
                    at,
                    var.length
                ));
                if full {
                    self.trace_values(at, var.vtype, var.length);
                }
                self.log.log(format_args!("\n"));
            }

            sp = sp.saturating_sub(proc.stackneeded);
            ip = frame.ip;
            csp -= 1;
        }

        self.log.log(format_args!("Global:\n"));
        for (i, var) in prog.vars.iter().enumerate() {
            if !var.is_global() {
                continue;
            }
            let name = prog.pool.get(var.name);
            if var.is_callback() {
                self.log
                    .log(format_args!(" {}: {}[{}] CB\n", i, name, var.length));
            } else {
                self.log.log(format_args!(
                    " {}: {}@{}[{}]",
                    i, name, var.offset, var.length
                ));
                if full {
                    self.trace_values(var.offset, var.vtype, var.length);
                }
                self.log.log(format_args!("\n"));
            }
        }
    }

    fn stack_arg_for_trace(&self, base: usize, slot: usize) -> Option<StackArg> {
        self.stack_arg(base, slot).ok()
    }

    fn trace_values(&mut self, at: usize, vtype: ValueType, length: u32) {
        match vtype {
            ValueType::Int => {
                for i in 0..length as usize {
                    let value = self.load_int(at + i * INT_SIZE).unwrap_or(0);
                    self.log.log(format_args!(" {}", value));
                }
            }
            ValueType::Float => {
                for i in 0..length as usize {
                    let value = self.load_float(at + i * FLOAT_SIZE).unwrap_or(0.0);
                    self.log.log(format_args!(" {}", value));
                }
            }
            ValueType::Byte => {
                self.log.log(format_args!(" \""));
                for i in 0..length as usize {
                    let value = self.load_byte(at + i).unwrap_or(0);
                    self.log.log(format_args!("{}", value as char));
                }
                self.log.log(format_args!("\""));
            }
        }
    }
}

fn arith_i(op: Opcode, a: i32, b: i32) -> Result<i32, Status> {
    Ok(match op {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Div => {
            if b == 0 {
                return Err(Status::InvalidInstruction);
            }
            a.wrapping_div(b)
        }
        _ => return Err(Status::InternalError),
    })
}

fn arith_f(op: Opcode, a: f64, b: f64) -> Result<f64, Status> {
    Ok(match op {
        Opcode::Add => a + b,
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        _ => return Err(Status::InternalError),
    })
}
