//! Shared helpers for the compiler stage tests and the per-instruction
//! interpreter tests.

mod instructions;

use crate::callback::Callback;
use crate::constants::MAX_PASSES;
use crate::error::CompileError;
use crate::log::StderrSink;
use crate::program::Compiler;
use crate::symbols::{Procedure, Variable};
use crate::vm::{Flags, Vm};
use std::cell::RefCell;
use std::rc::Rc;

fn lines_of(c: &Compiler) -> Vec<Vec<String>> {
    c.lines
        .iter()
        .map(|l| l.tokens.iter().map(|&t| c.pool.get(t).to_string()).collect())
        .collect()
}

/// Runs just the tokenizer and returns the token text per line.
pub(crate) fn compiler_tokenize(source: &str) -> Result<Vec<Vec<String>>, CompileError> {
    let mut sink = StderrSink;
    let mut c = Compiler::new(&[], &mut sink);
    c.stage = "tokenize".to_string();
    c.tokenize("test", source)?;
    Ok(lines_of(&c))
}

/// Tokenizes and runs preprocessor passes to fix-point.
pub(crate) fn compiler_preprocess(
    source: &str,
    defines: &[(String, String)],
) -> Result<Vec<Vec<String>>, CompileError> {
    let mut sink = StderrSink;
    let mut c = Compiler::new(&[], &mut sink);
    c.stage = "tokenize".to_string();
    c.tokenize("test", source)?;

    let defines: Vec<(u32, u32)> = defines
        .iter()
        .map(|(var, value)| (c.pool.add(var), c.pool.add(value)))
        .collect();

    let mut pass = 1;
    loop {
        c.stage = format!("preprocess {}", pass);
        if !c.preprocess(&defines)? {
            break;
        }
        if pass == MAX_PASSES {
            return Err(CompileError::PassesExceeded);
        }
        pass += 1;
    }

    Ok(lines_of(&c))
}

pub(crate) struct SymbolsResult {
    pub vars: Vec<Variable>,
    pub procs: Vec<Procedure>,
    pub initialstack: usize,
    pub stacksize: usize,
}

/// Runs the pipeline through the symbols stage.
pub(crate) fn compiler_symbols(source: &str) -> Result<SymbolsResult, CompileError> {
    let mut sink = StderrSink;
    let mut c = Compiler::new(&[], &mut sink);
    c.stage = "tokenize".to_string();
    c.tokenize("test", source)?;

    let mut pass = 1;
    loop {
        c.stage = format!("preprocess {}", pass);
        if !c.preprocess(&[])? {
            break;
        }
        if pass == MAX_PASSES {
            return Err(CompileError::PassesExceeded);
        }
        pass += 1;
    }

    c.stage = "symbols scan".to_string();
    c.symbols_scan()?;
    c.stage = "symbols verification".to_string();
    c.symbols_verify()?;

    let Compiler {
        vars,
        procs,
        initialstack,
        stacksize,
        ..
    } = c;
    Ok(SymbolsResult {
        vars,
        procs,
        initialstack,
        stacksize,
    })
}

/// A VM wired to the stock test callbacks, with every write recorded.
pub(crate) struct Harness {
    pub vm: Vm,
    pub ints: Rc<RefCell<Vec<i32>>>,
    pub floats: Rc<RefCell<Vec<f64>>>,
    pub bytes: Rc<RefCell<Vec<u8>>>,
}

impl Harness {
    pub fn run(&mut self) -> Result<(), crate::error::RuntimeError> {
        self.vm.run("init")
    }
}

/// Compiles `source` against callbacks `out` (byte write), `printint`
/// (int write) and `printfloat` (double write).
pub(crate) fn harness_sized(source: &str, callstack: usize) -> Result<Harness, CompileError> {
    let ints = Rc::new(RefCell::new(Vec::new()));
    let floats = Rc::new(RefCell::new(Vec::new()));
    let bytes = Rc::new(RefCell::new(Vec::new()));

    let int_sink = Rc::clone(&ints);
    let float_sink = Rc::clone(&floats);
    let byte_sink = Rc::clone(&bytes);
    let callbacks = vec![
        Callback::write_byte("out", move |value, _| {
            byte_sink.borrow_mut().push(value);
            Ok(())
        }),
        Callback::write_int("printint", move |value, _| {
            int_sink.borrow_mut().push(value);
            Ok(())
        }),
        Callback::write_float("printfloat", move |value, _| {
            float_sink.borrow_mut().push(value);
            Ok(())
        }),
    ];

    let vm = Vm::new(
        "test",
        source,
        Flags::default(),
        callstack,
        callbacks,
        &[],
        Box::new(StderrSink),
    )?;

    Ok(Harness {
        vm,
        ints,
        floats,
        bytes,
    })
}

pub(crate) fn harness(source: &str) -> Result<Harness, CompileError> {
    harness_sized(source, 0)
}

/// Compiles and runs `init`, returning the recorded `printint` values.
pub(crate) fn run_ints(source: &str) -> Vec<i32> {
    let mut h = harness(source).expect("compile failed");
    h.run().expect("run failed");
    let ints = h.ints.borrow().clone();
    ints
}
