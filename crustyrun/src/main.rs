#[macro_use]
extern crate clap;

use clap::Arg;
use crustyvm::{Callback, CallbackError, CompileError, Flags, RuntimeError, StderrSink, Vm};
use std::fs;
use std::io::{self, Write};
use std::process;

#[derive(Debug)]
enum Error {
    Io(std::io::Error, String),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, path) => write!(f, "Reading file \"{}\" failed: {}", path, err),
            Error::Compile(err) => write!(f, "Failed to load program: {}", err),
            Error::Runtime(err) => write!(f, "Program reached an exception while running: {}", err),
        }
    }
}

/// Splits `NAME=VALUE`; the name must be nonempty.
fn parse_define(def: &str) -> Option<(String, String)> {
    let equals = def.find('=')?;
    if equals == 0 {
        return None;
    }
    Some((def[..equals].to_string(), def[equals + 1..].to_string()))
}

fn stock_callbacks() -> Vec<Callback> {
    vec![
        Callback::write_byte("out", |value, _| {
            io::stdout()
                .write_all(&[value])
                .map_err(|_| CallbackError)
        }),
        Callback::write_byte("err", |value, _| {
            io::stderr()
                .write_all(&[value])
                .map_err(|_| CallbackError)
        }),
        Callback::write_int("printint", |value, _| {
            eprint!("{}", value);
            Ok(())
        }),
        Callback::write_float("printfloat", |value, _| {
            eprint!("{}", value);
            Ok(())
        }),
    ]
}

fn run(filename: &str, defines: &[(String, String)]) -> Result<(), Error> {
    let source =
        fs::read_to_string(filename).map_err(|err| Error::Io(err, filename.to_string()))?;

    let mut vm = Vm::new(
        filename,
        &source,
        Flags::default(),
        0,
        stock_callbacks(),
        defines,
        Box::new(StderrSink),
    )
    .map_err(Error::Compile)?;

    eprintln!("Program loaded.");
    eprintln!("Token memory size: {}", vm.program().token_bytes());
    eprintln!("Stack size: {}", vm.program().stack_size());

    if let Err(err) = vm.run("init") {
        eprintln!();
        vm.debugtrace(true);
        return Err(Error::Runtime(err));
    }

    eprintln!();
    eprintln!("Program completed successfully.");
    Ok(())
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("define")
                .short("D")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("NAME=VALUE")
                .help("Defines a preprocessor variable"),
        )
        .arg(
            Arg::with_name("FILE")
                .help("Sets the program to run")
                .required(true)
                .index(1),
        )
        .get_matches();

    let mut defines = Vec::new();
    if let Some(values) = matches.values_of("define") {
        for def in values {
            match parse_define(def) {
                Some(define) => defines.push(define),
                None => {
                    eprintln!("Defines take the form -Dname=value: {}", def);
                    process::exit(1);
                }
            }
        }
    }

    // clap guarantees FILE is present
    let filename = matches.value_of("FILE").unwrap();

    if let Err(err) = run(filename, &defines) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::parse_define;

    #[test]
    fn define_forms() {
        assert_eq!(
            parse_define("N=5"),
            Some(("N".to_string(), "5".to_string()))
        );
        assert_eq!(
            parse_define("NAME="),
            Some(("NAME".to_string(), String::new()))
        );
        assert_eq!(parse_define("=5"), None);
        assert_eq!(parse_define("N"), None);
    }
}
