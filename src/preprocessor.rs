//! Second stage: fix-point rewriting passes over the line list.
//!
//! Each pass walks every line, substring-substituting external defines,
//! the active macro's arguments and `expr` bindings into each token,
//! then interprets the directives `macro`/`endmacro`/`if`/`expr` and
//! macro calls.  A pass reports whether it saw work that only a later
//! pass can do (a `macro` or `expr` inside a macro body being
//! recorded); the driver keeps running passes until none is reported.

use crate::constants::MACRO_STACK_SIZE;
use crate::error::CompileError;
use crate::expr::evaluate;
use crate::instructions::is_reserved;
use crate::int_util::parse_int;
use crate::program::Compiler;
use crate::tokenizer::Line;

struct Macro {
    name: u32,
    /// Line index of the first body line in the input line list.
    start: usize,
    args: Vec<u32>,
}

struct Expansion {
    mac: usize,
    args: Vec<u32>,
    ret: usize,
}

impl<'a> Compiler<'a> {
    /// Runs one preprocessor pass, replacing the line list.  Returns
    /// true when a later pass has remaining work.
    pub(crate) fn preprocess(&mut self, defines: &[(u32, u32)]) -> Result<bool, CompileError> {
        let mut out: Vec<Line> = Vec::new();
        let mut macros: Vec<Macro> = Vec::new();
        let mut recording: Option<usize> = None;
        let mut stack: Vec<Expansion> = Vec::new();
        let mut expr_vars: Vec<(u32, u32)> = Vec::new();
        let mut found_macro = false;

        self.logline = 0;
        while self.logline < self.lines.len() {
            let at = self.logline;
            let mut active = self.lines[at].tokens.clone();

            // an endmacro naming the macro being recorded or expanded
            // must survive substitution or the terminator could break
            let protected = active.len() >= 2
                && self.pool.get(active[0]) == "endmacro"
                && {
                    let name = self.pool.get(active[1]);
                    let recorded = recording
                        .map(|m| self.pool.get(macros[m].name) == name)
                        .unwrap_or(false);
                    let expanding = stack
                        .last()
                        .map(|e| self.pool.get(macros[e.mac].name) == name)
                        .unwrap_or(false);
                    recorded || expanding
                };

            if !protected {
                for token in active.iter_mut() {
                    for &(var, value) in defines {
                        *token = self.string_replace(*token, var, value);
                    }
                    if let Some(top) = stack.last() {
                        for (argnum, &formal) in macros[top.mac].args.iter().enumerate() {
                            *token = self.string_replace(*token, formal, top.args[argnum]);
                        }
                    }
                    for &(var, value) in &expr_vars {
                        *token = self.string_replace(*token, var, value);
                    }
                }
            }

            let first = self.pool.get(active[0]).to_string();
            match first.as_str() {
                "macro" => {
                    if recording.is_none() {
                        if active.len() < 2 {
                            self.log_line(format_args!(
                                "Macros must at least be defined with a name."
                            ));
                            return Err(CompileError::Preprocess);
                        }

                        // redefinition of the same name overwrites
                        let name = self.pool.get(active[1]).to_string();
                        let slot = match macros
                            .iter()
                            .position(|m| self.pool.get(m.name) == name)
                        {
                            Some(slot) => slot,
                            None => {
                                macros.push(Macro {
                                    name: 0,
                                    start: 0,
                                    args: Vec::new(),
                                });
                                macros.len() - 1
                            }
                        };
                        macros[slot] = Macro {
                            name: active[1],
                            start: at + 1,
                            args: active[2..].to_vec(),
                        };
                        recording = Some(slot);

                        self.logline += 1;
                        continue;
                    }
                    found_macro = true;
                }
                "endmacro" => {
                    if active.len() != 2 {
                        self.log_line(format_args!("endmacro takes a name."));
                        return Err(CompileError::Preprocess);
                    }

                    // closes the macro being recorded
                    if let Some(m) = recording {
                        if self.pool.get(active[1]) == self.pool.get(macros[m].name) {
                            recording = None;
                            self.logline += 1;
                            continue;
                        }
                    }

                    // ends output of the macro being expanded
                    let expanding = stack.last().map(|top| {
                        (
                            self.pool.get(active[1]) == self.pool.get(macros[top.mac].name),
                            top.ret,
                        )
                    });
                    if let Some((true, ret)) = expanding {
                        stack.pop();
                        self.logline = ret + 1;
                        continue;
                    }
                }
                "if" => {
                    if recording.is_none() {
                        if active.len() < 3 {
                            self.log_line(format_args!(
                                "if takes a variable and at least 1 more argument."
                            ));
                            return Err(CompileError::Preprocess);
                        }

                        // substitution already happened, so the
                        // condition is a number or it's false
                        let taken = parse_int(self.pool.get(active[1]))
                            .map(|value| value != 0)
                            .unwrap_or(false);
                        if taken {
                            // rewrite the stored line and re-evaluate it
                            let tokens = &mut self.lines[at].tokens;
                            tokens.drain(0..2);
                            continue;
                        }

                        self.logline += 1;
                        continue;
                    }
                }
                "expr" => {
                    if recording.is_none() {
                        if active.len() < 3 {
                            self.log_line(format_args!(
                                "expr takes a variable name and an expression."
                            ));
                            return Err(CompileError::Preprocess);
                        }

                        // the expression may be one quoted token or a
                        // run of bare tokens
                        let expression = active[2..]
                            .iter()
                            .map(|&t| self.pool.get(t))
                            .collect::<Vec<_>>()
                            .join(" ");
                        let value = match evaluate(&expression) {
                            Ok(value) => value,
                            Err(fault) => {
                                self.log_line(format_args!("{}", fault));
                                self.log_line(format_args!("Expression evaluation failed."));
                                return Err(CompileError::Preprocess);
                            }
                        };
                        let value = self.pool.add(&value.to_string());
                        expr_vars.push((active[1], value));

                        self.logline += 1;
                        continue;
                    }
                    found_macro = true;
                }
                name if !is_reserved(name) => {
                    if recording.is_none() {
                        if stack.len() == MACRO_STACK_SIZE {
                            self.log_line(format_args!("Macro stack filled."));
                            return Err(CompileError::Preprocess);
                        }

                        let called = match macros
                            .iter()
                            .position(|m| self.pool.get(m.name) == name)
                        {
                            Some(called) => called,
                            None => {
                                self.log_line(format_args!(
                                    "Invalid keyword or macro not found: {}.",
                                    first
                                ));
                                return Err(CompileError::Preprocess);
                            }
                        };

                        if stack.iter().any(|e| e.mac == called) {
                            self.log_line(format_args!("Macro called recursively: {}.", first));
                            return Err(CompileError::Preprocess);
                        }
                        if active.len() - 1 != macros[called].args.len() {
                            self.log_line(format_args!(
                                "Wrong number of arguments to macro: got {}, expected {}.",
                                active.len() - 1,
                                macros[called].args.len()
                            ));
                            return Err(CompileError::Preprocess);
                        }

                        let start = macros[called].start;
                        stack.push(Expansion {
                            mac: called,
                            args: active[1..].to_vec(),
                            ret: at,
                        });
                        self.logline = start;
                        continue;
                    }
                }
                _ => {}
            }

            // a macro body being recorded isn't copied to the output
            if recording.is_none() {
                out.push(Line {
                    module: self.lines[at].module,
                    line: self.lines[at].line,
                    tokens: active,
                    instruction: 0,
                });
            }
            self.logline += 1;
        }

        if let Some(m) = recording {
            let name = self.pool.get(macros[m].name).to_string();
            self.log_msg(format_args!("Macro without endmacro: {}.", name));
            return Err(CompileError::Preprocess);
        }

        self.lines = out;
        Ok(found_macro)
    }

    /// Replaces every occurrence of `needle` in `token` and returns the
    /// offset of the result, or `token` itself when nothing matched.
    fn string_replace(&mut self, token: u32, needle: u32, replacement: u32) -> u32 {
        let replaced = {
            let haystack = self.pool.get(token);
            let needle = self.pool.get(needle);
            if needle.is_empty() || !haystack.contains(needle) {
                return token;
            }
            haystack.replace(needle, self.pool.get(replacement))
        };
        self.pool.add(&replaced)
    }
}

#[cfg(test)]
mod tests {
    use crate::test::compiler_preprocess;

    fn pp(source: &str) -> Vec<Vec<String>> {
        compiler_preprocess(source, &[]).expect("preprocess failed")
    }

    #[test]
    fn macro_expansion_with_arguments() {
        let lines = pp("macro inc X\nadd X 1\nendmacro inc\nproc init\ninc c\ninc d\nret\n");
        assert_eq!(
            lines,
            vec![
                vec!["proc", "init"],
                vec!["add", "c", "1"],
                vec!["add", "d", "1"],
                vec!["ret"],
            ]
        );
    }

    #[test]
    fn macro_redefinition_overwrites() {
        let lines = pp(
            "macro put\nmove out 1\nendmacro put\n\
             macro put\nmove out 2\nendmacro put\n\
             put\n",
        );
        assert_eq!(lines, vec![vec!["move", "out", "2"]]);
    }

    #[test]
    fn nested_macro_defined_on_later_pass() {
        let lines = pp(
            "macro outer\nmacro inner\nmove a 1\nendmacro inner\nendmacro outer\n\
             outer\ninner\n",
        );
        assert_eq!(lines, vec![vec!["move", "a", "1"]]);
    }

    #[test]
    fn if_taken_rewrites_line() {
        let lines = pp("expr cond 2 > 1\nif cond move a 1\nif 0 move a 2\n");
        assert_eq!(lines, vec![vec!["move", "a", "1"]]);
    }

    #[test]
    fn if_condition_not_numeric_drops_line() {
        let lines = pp("if maybe move a 1\nret\n");
        assert_eq!(lines, vec![vec!["ret"]]);
    }

    #[test]
    fn expr_binds_variable() {
        let lines = pp("expr x 2 + 3 * 4\nstatic v x\n");
        assert_eq!(lines, vec![vec!["static", "v", "14"]]);
    }

    #[test]
    fn defines_substitute() {
        let lines = compiler_preprocess(
            "move a COUNT\n",
            &[("COUNT".to_string(), "5".to_string())],
        )
        .expect("preprocess failed");
        assert_eq!(lines, vec![vec!["move", "a", "5"]]);
    }

    #[test]
    fn recursive_macro_fails() {
        assert!(compiler_preprocess(
            "macro loop\nloop\nendmacro loop\nloop\n",
            &[]
        )
        .is_err());
    }

    #[test]
    fn wrong_arity_fails() {
        assert!(compiler_preprocess(
            "macro inc X\nadd X 1\nendmacro inc\ninc a b\n",
            &[]
        )
        .is_err());
    }

    #[test]
    fn unterminated_macro_fails() {
        assert!(compiler_preprocess("macro inc X\nadd X 1\n", &[]).is_err());
    }

    #[test]
    fn unknown_statement_fails() {
        assert!(compiler_preprocess("frobnicate a\n", &[]).is_err());
    }
}
