//! Third stage: walk the preprocessed lines once, collecting
//! procedures, variables and labels, then lay storage out on the
//! runtime stack.  Directives consumed here (`proc`, `static`, `local`,
//! `stack`, `label`) are dropped from the line list; everything left
//! emits exactly one instruction later.
//!
//! Layout: globals first, each padded to int alignment, giving the
//! initial stack.  Then per procedure: one stack argument slot per
//! argument, then locals, with per-variable offsets measured from the
//! top of the frame so a procedure finds its storage at `sp - offset`.

use crate::callback::ValueType;
use crate::constants::{ALIGNMENT, STACK_ARG_SIZE};
use crate::error::CompileError;
use crate::int_util::{parse_float, parse_int};
use crate::program::Compiler;
use crate::tokenizer::Line;

/// Static initializer for one variable.  A variable carries at most one
/// of these; callback variables and by-reference arguments carry none.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Init {
    Bytes(Vec<u8>),
    Ints(Vec<i32>),
    Floats(Vec<f64>),
}

impl Init {
    fn matches(&self, vtype: ValueType) -> bool {
        matches!(
            (self, vtype),
            (Init::Bytes(_), ValueType::Byte)
                | (Init::Ints(_), ValueType::Int)
                | (Init::Floats(_), ValueType::Float)
        )
    }
}

pub(crate) struct Variable {
    pub name: u32,
    pub vtype: ValueType,
    /// Owning procedure; None for globals.
    pub proc: Option<usize>,
    /// Element count: 0 marks a by-reference procedure argument.
    pub length: u32,
    /// Storage offset; meaning depends on the kind (global offset,
    /// frame-top offset, or 1-based argument slot number).
    pub offset: usize,
    pub init: Option<Init>,
    /// Index into the embedder's callback table.
    pub callback: Option<usize>,
    pub cb_read: bool,
    pub cb_write: bool,
}

impl Variable {
    pub fn is_global(&self) -> bool {
        self.proc.is_none()
    }

    pub fn is_argument(&self) -> bool {
        self.length == 0
    }

    pub fn is_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Callback that can only be read.
    pub fn read_only(&self) -> bool {
        self.cb_read && !self.cb_write
    }

    /// Callback that can only be written.
    pub fn write_only(&self) -> bool {
        self.cb_write && !self.cb_read
    }

    pub fn byte_len(&self) -> usize {
        self.length as usize * self.vtype.size()
    }
}

pub(crate) struct Label {
    pub name: u32,
    /// Emitted-line index the label marks.
    pub line: usize,
}

pub(crate) struct Procedure {
    pub name: u32,
    /// First emitted-line index of the body.
    pub start: usize,
    /// Source lines spanned by the body, directives included.
    pub length: usize,
    pub args: usize,
    /// Frame size in bytes: argument slots plus locals.
    pub stackneeded: usize,
    /// Entry instruction offset; filled in by the code generator.
    pub instruction: usize,
    /// Indices into the variable table, arguments first.
    pub vars: Vec<usize>,
    pub labels: Vec<Label>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn find_procedure(&self, name: &str) -> Option<usize> {
        self.procs
            .iter()
            .position(|p| self.pool.get(p.name) == name)
    }

    /// Looks a name up in the procedure's scope first, then globals.
    pub(crate) fn find_variable(&self, proc: Option<usize>, name: &str) -> Option<usize> {
        if let Some(p) = proc {
            for &v in &self.procs[p].vars {
                if self.pool.get(self.vars[v].name) == name {
                    return Some(v);
                }
            }
        }
        self.vars
            .iter()
            .position(|v| v.is_global() && self.pool.get(v.name) == name)
    }

    pub(crate) fn new_variable(
        &mut self,
        name: u32,
        vtype: ValueType,
        length: u32,
        init: Option<Init>,
        callback: Option<usize>,
        proc: Option<usize>,
    ) -> Result<(), CompileError> {
        if self
            .find_variable(proc, self.pool.get(name))
            .is_some()
        {
            let kind = if callback.is_some() {
                "callback"
            } else if proc.is_none() {
                "static"
            } else {
                "local"
            };
            let name = self.pool.get(name).to_string();
            self.log_msg(format_args!("Redeclaration of {} variable {}.", kind, name));
            return Err(CompileError::Symbols);
        }

        let (cb_read, cb_write) = callback
            .map(|c| {
                let handlers = &self.callbacks[c].handlers;
                (handlers.readable(), handlers.writable())
            })
            .unwrap_or((false, false));

        self.vars.push(Variable {
            name,
            vtype,
            proc,
            length,
            offset: 0,
            init,
            callback,
            cb_read,
            cb_write,
        });

        if let Some(p) = proc {
            let index = self.vars.len() - 1;
            self.procs[p].vars.push(index);
        }

        Ok(())
    }

    fn variable_declaration(
        &mut self,
        line: usize,
        proc: Option<usize>,
    ) -> Result<(), CompileError> {
        let tokens = self.lines[line].tokens.clone();

        let (vtype, length, init) = if tokens.len() == 2 {
            // no initializer, allocated to 0
            (ValueType::Int, 1, Init::Ints(vec![0]))
        } else if tokens.len() == 3 {
            match parse_int(self.pool.get(tokens[2])) {
                Some(value) => (ValueType::Int, 1, Init::Ints(vec![value])),
                None => {
                    self.log_line(format_args!("Initializer wasn't a number."));
                    return Err(CompileError::Symbols);
                }
            }
        } else {
            match self.pool.get(tokens[2]) {
                "ints" => {
                    let list = self.join_tokens(&tokens[3..]);
                    let values = match number_list_ints(&list) {
                        Some(values) if !values.is_empty() => values,
                        _ => {
                            self.log_line(format_args!(
                                "Initializer must be a space separated list of numbers."
                            ));
                            return Err(CompileError::Symbols);
                        }
                    };
                    if values.len() == 1 {
                        // a single value is an array size, zero filled
                        let count = values[0];
                        if count <= 0 {
                            self.log_line(format_args!("Array size must be positive."));
                            return Err(CompileError::Symbols);
                        }
                        (ValueType::Int, count as u32, Init::Ints(vec![0; count as usize]))
                    } else {
                        (ValueType::Int, values.len() as u32, Init::Ints(values))
                    }
                }
                "floats" => {
                    let list = self.join_tokens(&tokens[3..]);
                    let values = match number_list_floats(&list) {
                        Some(values) if !values.is_empty() => values,
                        _ => {
                            self.log_line(format_args!(
                                "Initializer must be a space separated list of numbers."
                            ));
                            return Err(CompileError::Symbols);
                        }
                    };
                    (ValueType::Float, values.len() as u32, Init::Floats(values))
                }
                "string" if tokens.len() == 4 => {
                    let bytes = self.pool.get(tokens[3]).as_bytes().to_vec();
                    (ValueType::Byte, bytes.len() as u32, Init::Bytes(bytes))
                }
                _ => {
                    self.log_line(format_args!(
                        "Variable declaration takes a number, ints, floats or string."
                    ));
                    return Err(CompileError::Symbols);
                }
            }
        };

        self.new_variable(tokens[1], vtype, length, Some(init), None, proc)
    }

    fn join_tokens(&self, tokens: &[u32]) -> String {
        tokens
            .iter()
            .map(|&t| self.pool.get(t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn symbols_scan(&mut self) -> Result<(), CompileError> {
        let mut out: Vec<Line> = Vec::new();
        let mut curproc: Option<usize> = None;
        let mut extra_stack = 0usize;

        self.logline = 0;
        while self.logline < self.lines.len() {
            let at = self.logline;
            if let Some(p) = curproc {
                self.procs[p].length += 1;
            }

            let first = self.pool.get(self.lines[at].tokens[0]).to_string();
            let tokens = self.lines[at].tokens.clone();
            match first.as_str() {
                "proc" => {
                    if tokens.len() < 2 {
                        self.log_line(format_args!("proc takes a name as argument."));
                        return Err(CompileError::Symbols);
                    }
                    if curproc.is_some() {
                        self.log_line(format_args!("proc within proc."));
                        return Err(CompileError::Symbols);
                    }
                    if self.find_procedure(self.pool.get(tokens[1])).is_some() {
                        self.log_line(format_args!("Redeclaration of procedure."));
                        return Err(CompileError::Symbols);
                    }

                    self.procs.push(Procedure {
                        name: tokens[1],
                        start: out.len(),
                        length: 0,
                        args: tokens.len() - 2,
                        stackneeded: 0,
                        instruction: 0,
                        vars: Vec::new(),
                        labels: Vec::new(),
                    });
                    let p = self.procs.len() - 1;
                    curproc = Some(p);

                    // arguments become length-0 locals, int by default
                    for &arg in &tokens[2..] {
                        self.new_variable(arg, ValueType::Int, 0, None, None, Some(p))?;
                    }

                    self.logline += 1;
                    continue;
                }
                "ret" => {
                    // a real instruction; also closes the scope
                    if curproc.is_none() {
                        self.log_line(format_args!("ret without proc."));
                        return Err(CompileError::Symbols);
                    }
                    curproc = None;
                }
                "static" => {
                    if tokens.len() < 2 {
                        self.log_line(format_args!("static takes a name as argument."));
                        return Err(CompileError::Symbols);
                    }
                    self.variable_declaration(at, None)?;
                    self.logline += 1;
                    continue;
                }
                "local" => {
                    if tokens.len() < 2 {
                        self.log_line(format_args!("local takes a name as argument."));
                        return Err(CompileError::Symbols);
                    }
                    if curproc.is_none() {
                        self.log_line(format_args!("local declared outside of procedure."));
                        return Err(CompileError::Symbols);
                    }
                    self.variable_declaration(at, curproc)?;
                    self.logline += 1;
                    continue;
                }
                "stack" => {
                    let size = if tokens.len() == 2 {
                        parse_int(self.pool.get(tokens[1]))
                    } else {
                        None
                    };
                    match size {
                        Some(size) if size >= 0 => extra_stack += size as usize,
                        _ => {
                            self.log_line(format_args!("stack takes a number as argument."));
                            return Err(CompileError::Symbols);
                        }
                    }
                    self.logline += 1;
                    continue;
                }
                "label" => {
                    if tokens.len() != 2 {
                        self.log_line(format_args!("label takes a name as argument."));
                        return Err(CompileError::Symbols);
                    }
                    let p = match curproc {
                        Some(p) => p,
                        None => {
                            self.log_line(format_args!("label not in a procedure."));
                            return Err(CompileError::Symbols);
                        }
                    };
                    let line = out.len();
                    self.procs[p].labels.push(Label {
                        name: tokens[1],
                        line,
                    });
                    self.logline += 1;
                    continue;
                }
                _ => {}
            }

            out.push(Line {
                module: self.lines[at].module,
                line: self.lines[at].line,
                tokens,
                instruction: 0,
            });
            self.logline += 1;
        }

        if curproc.is_some() {
            self.log_msg(format_args!("Procedure without return."));
            return Err(CompileError::Symbols);
        }

        self.lines = out;
        self.layout(extra_stack);

        Ok(())
    }

    /// Assigns storage offsets and computes the runtime stack size.
    fn layout(&mut self, extra_stack: usize) {
        self.initialstack = 0;
        for var in self.vars.iter_mut() {
            if var.is_global() && !var.is_callback() {
                var.offset = self.initialstack;
                self.initialstack += var.byte_len();
                if self.initialstack % ALIGNMENT != 0 {
                    self.initialstack += ALIGNMENT - (self.initialstack % ALIGNMENT);
                }
            }
        }

        self.stacksize = self.initialstack;
        for p in 0..self.procs.len() {
            let mut needed = 0usize;
            for slot in 0..self.procs[p].vars.len() {
                let v = self.procs[p].vars[slot];
                if self.vars[v].is_argument() {
                    // the Kth argument's slot sits K slots below the
                    // frame top
                    self.vars[v].offset = slot + 1;
                    needed += STACK_ARG_SIZE;
                } else {
                    needed += self.vars[v].byte_len();
                    if self.vars[v].vtype == ValueType::Byte && needed % ALIGNMENT != 0 {
                        needed += ALIGNMENT - (needed % ALIGNMENT);
                    }
                    // offsets address the high end of the variable
                    self.vars[v].offset = needed;
                }
            }
            self.procs[p].stackneeded = needed;
            self.stacksize += needed;
        }

        self.stacksize += extra_stack;
    }

    /// Proves the symbol table invariants, reporting every fault it can
    /// find before giving up.
    pub(crate) fn symbols_verify(&mut self) -> Result<(), CompileError> {
        let mut ok = true;

        for i in 0..self.vars.len() {
            let name = self.pool.get(self.vars[i].name).to_string();
            if self.vars[i].is_global() {
                if self.vars[i].length == 0 {
                    self.log_msg(format_args!("Global variable {} has 0 length.", name));
                    ok = false;
                }
                if self.vars[i].is_callback() {
                    continue;
                }

                let mismatched = {
                    let var = &self.vars[i];
                    var.init
                        .as_ref()
                        .map(|init| !init.matches(var.vtype))
                };
                match mismatched {
                    None => {
                        self.log_msg(format_args!(
                            "Non-callback variable {} has no initializer.",
                            name
                        ));
                        ok = false;
                    }
                    Some(true) => {
                        self.log_msg(format_args!(
                            "Variable {} has no initializer for type.",
                            name
                        ));
                        ok = false;
                    }
                    Some(false) => {}
                }

                let end = self.vars[i].offset + self.vars[i].byte_len();
                if end > self.initialstack {
                    let (offset, len) = (self.vars[i].offset, self.vars[i].byte_len());
                    let initialstack = self.initialstack;
                    self.log_msg(format_args!(
                        "Global variable {} exceeds initial stack: {} + {} = {} > {}",
                        name,
                        offset,
                        len,
                        end,
                        initialstack
                    ));
                    ok = false;
                }

                for j in i + 1..self.vars.len() {
                    if !self.vars[j].is_global() || self.vars[j].is_callback() {
                        continue;
                    }
                    let (a0, a1) = (self.vars[i].offset, end);
                    let (b0, b1) = (
                        self.vars[j].offset,
                        self.vars[j].offset + self.vars[j].byte_len(),
                    );
                    if a0 < b1 && b0 < a1 {
                        let other = self.pool.get(self.vars[j].name).to_string();
                        self.log_msg(format_args!(
                            "Global variables {} and {} overlap: ({} -> {}) ({} -> {})",
                            name,
                            other,
                            a0,
                            a1 - 1,
                            b0,
                            b1 - 1
                        ));
                        ok = false;
                    }
                }
            } else {
                if self.vars[i].is_callback() {
                    self.log_msg(format_args!("Local variable {} with callback.", name));
                    ok = false;
                }

                let owner = self.vars[i].proc.unwrap_or(0);
                if !self.procs[owner].vars.contains(&i) {
                    let proc = self.pool.get(self.procs[owner].name).to_string();
                    self.log_msg(format_args!(
                        "Couldn't find variable in procedure {} referenced by variable {}.",
                        proc, name
                    ));
                    ok = false;
                }

                if self.vars[i].is_argument() {
                    if self.vars[i].init.is_some() {
                        self.log_msg(format_args!(
                            "Local argument variable {} with initializer set.",
                            name
                        ));
                        ok = false;
                    }
                } else {
                    let mismatched = {
                        let var = &self.vars[i];
                        var.init
                            .as_ref()
                            .map(|init| !init.matches(var.vtype))
                    };
                    match mismatched {
                        None => {
                            self.log_msg(format_args!(
                                "Local variable {} with length but no initializer.",
                                name
                            ));
                            ok = false;
                        }
                        Some(true) => {
                            self.log_msg(format_args!(
                                "Local variable {} has no initializer for type.",
                                name
                            ));
                            ok = false;
                        }
                        Some(false) => {}
                    }
                }
            }
        }

        for p in 0..self.procs.len() {
            for slot in 0..self.procs[p].vars.len() {
                let v = self.procs[p].vars[slot];
                let name = self.pool.get(self.vars[v].name).to_string();
                let proc_name = self.pool.get(self.procs[p].name).to_string();

                if self.vars[v].proc != Some(p) {
                    self.log_msg(format_args!(
                        "Mispointed variable {} in procedure {}.",
                        name, proc_name
                    ));
                    ok = false;
                }

                if self.vars[v].is_argument() {
                    if slot > self.procs[p].args {
                        let args = self.procs[p].args;
                        self.log_msg(format_args!(
                            "Variable {} in proc {} has 0 length but index greater \
                             than args. ({} > {})",
                            name, proc_name, slot, args
                        ));
                        ok = false;
                    }
                    if self.vars[v].offset > self.procs[p].args {
                        let (offset, args) = (self.vars[v].offset, self.procs[p].args);
                        self.log_msg(format_args!(
                            "Variable {} in proc {} is argument but stack offset \
                             greater than args. ({} > {})",
                            name, proc_name, offset, args
                        ));
                        ok = false;
                    }
                }

                let (v0, v1) = self.frame_range(v);
                if v1 > self.procs[p].stackneeded {
                    let needed = self.procs[p].stackneeded;
                    self.log_msg(format_args!(
                        "Variable {} from procedure {} exceeds needed stack: {} > {}",
                        name, proc_name, v1, needed
                    ));
                    ok = false;
                }

                for other_slot in slot + 1..self.procs[p].vars.len() {
                    let w = self.procs[p].vars[other_slot];
                    let (w0, w1) = self.frame_range(w);
                    if v0 < w1 && w0 < v1 {
                        let other = self.pool.get(self.vars[w].name).to_string();
                        self.log_msg(format_args!(
                            "Variables {} and {} from procedure {} overlap: \
                             ({} -> {}) ({} -> {})",
                            name,
                            other,
                            proc_name,
                            v0,
                            v1 - 1,
                            w0,
                            w1 - 1
                        ));
                        ok = false;
                    }
                }
            }
        }

        if ok {
            Ok(())
        } else {
            Err(CompileError::SymbolsVerify)
        }
    }

    /// Byte range a variable occupies within its frame, measured down
    /// from the frame top.
    fn frame_range(&self, v: usize) -> (usize, usize) {
        let var = &self.vars[v];
        if var.is_argument() {
            let end = var.offset * STACK_ARG_SIZE;
            (end - STACK_ARG_SIZE, end)
        } else {
            (var.offset - var.byte_len(), var.offset)
        }
    }
}

fn number_list_ints(list: &str) -> Option<Vec<i32>> {
    list.split(|c| c == ' ' || c == '\t')
        .filter(|part| !part.is_empty())
        .map(parse_int)
        .collect()
}

fn number_list_floats(list: &str) -> Option<Vec<f64>> {
    list.split(|c| c == ' ' || c == '\t')
        .filter(|part| !part.is_empty())
        .map(parse_float)
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::callback::ValueType;
    use crate::test::compiler_symbols;

    #[test]
    fn globals_layout_is_aligned() {
        let c = compiler_symbols(
            "static a\nstatic b string \"abc\"\nstatic c floats 1.5 2.5\n\
             proc init\nret\n",
        )
        .expect("symbols failed");
        // a: int at 0; b: 3 bytes at 4, padded to 8; c: doubles at 8
        assert_eq!(c.vars[0].offset, 0);
        assert_eq!(c.vars[1].offset, 4);
        assert_eq!(c.vars[2].offset, 8);
        assert_eq!(c.initialstack, 24);
        assert_eq!(c.vars[1].vtype, ValueType::Byte);
        assert_eq!(c.vars[2].length, 2);
    }

    #[test]
    fn int_array_size_form() {
        let c = compiler_symbols("static a ints 10\nproc init\nret\n").expect("symbols failed");
        assert_eq!(c.vars[0].length, 10);
        assert_eq!(c.initialstack, 40);
    }

    #[test]
    fn int_array_value_form() {
        let c =
            compiler_symbols("static a ints 10 20 30\nproc init\nret\n").expect("symbols failed");
        assert_eq!(c.vars[0].length, 3);
    }

    #[test]
    fn proc_frame_layout() {
        let c = compiler_symbols(
            "proc f x y\nlocal a\nlocal s string \"ab\"\nret\n\
             proc init\nret\n",
        )
        .expect("symbols failed");
        let f = &c.procs[0];
        assert_eq!(f.args, 2);
        // two arg slots (16 each), an int, and a padded 2-byte string
        assert_eq!(f.stackneeded, 16 + 16 + 4 + 4);
        let x = &c.vars[f.vars[0]];
        assert_eq!((x.length, x.offset), (0, 1));
        let a = &c.vars[f.vars[2]];
        assert_eq!(a.offset, 36);
    }

    #[test]
    fn stack_directive_is_additive() {
        let c = compiler_symbols("stack 64\nstack 32\nproc init\nret\n").expect("symbols failed");
        assert_eq!(c.stacksize, c.initialstack + 96);
    }

    #[test]
    fn labels_record_emitted_position() {
        let c = compiler_symbols(
            "proc init\nmove a a\nlabel here\nmove a a\nret\n",
        );
        // `a` is undeclared but symbols doesn't resolve operands yet
        let c = c.expect("symbols failed");
        assert_eq!(c.procs[0].labels.len(), 1);
        assert_eq!(c.procs[0].labels[0].line, 1);
    }

    #[test]
    fn nested_proc_fails() {
        assert!(compiler_symbols("proc a\nproc b\nret\nret\n").is_err());
    }

    #[test]
    fn local_outside_proc_fails() {
        assert!(compiler_symbols("local a\n").is_err());
    }

    #[test]
    fn missing_ret_fails() {
        assert!(compiler_symbols("proc init\nmove a a\n").is_err());
    }

    #[test]
    fn redeclaration_fails() {
        assert!(compiler_symbols("static a\nstatic a\nproc init\nret\n").is_err());
    }
}
