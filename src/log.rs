//! Injected logging sink.  The engine produces no output of its own;
//! every diagnostic and trace line goes through the sink the embedder
//! supplies.  Compile-time diagnostics are one line per fault, prefixed
//! with the stage and, when known, the module and source line.

use std::fmt;

pub trait LogSink {
    fn log(&mut self, args: fmt::Arguments);
}

impl<F: FnMut(fmt::Arguments)> LogSink for F {
    fn log(&mut self, args: fmt::Arguments) {
        self(args)
    }
}

/// Sink that writes to standard error.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&mut self, args: fmt::Arguments) {
        eprint!("{}", args);
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&mut self, _args: fmt::Arguments) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn closures_are_sinks() {
        let seen = Rc::new(RefCell::new(String::new()));
        let inner = Rc::clone(&seen);
        let mut sink = move |args: fmt::Arguments| {
            inner.borrow_mut().push_str(&args.to_string());
        };
        sink.log(format_args!("x = {}", 3));
        assert_eq!(*seen.borrow(), "x = 3");
    }
}
