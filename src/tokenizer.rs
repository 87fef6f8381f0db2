//! First stage: split the source text, plus everything it `include`s,
//! into a sequence of [`Line`]s whose tokens live in the token pool.
//!
//! Token separators are whitespace and `;`, which also opens a comment
//! running to the end of the line.  A `"` at the start of a token opens
//! a quoted string that may span lines; escape resolution happens while
//! the token is copied into the pool.  `include` lines are replaced by
//! the named file's contents, tokenized in place with the filename as
//! the module name.

use crate::constants::MAX_INCLUDE_DEPTH;
use crate::error::CompileError;
use crate::pool::QuoteError;
use crate::program::Compiler;
use std::fs;
use std::mem;

/// A source line after tokenization: a module name, a 1-based line
/// number within that module, and the pool offsets of its tokens.
pub(crate) struct Line {
    pub module: u32,
    pub line: u32,
    pub tokens: Vec<u32>,
    /// Offset of the emitted instruction; filled in by the code
    /// generator.
    pub instruction: usize,
}

struct Frame {
    data: Vec<u8>,
    module: u32,
    line: u32,
    pos: usize,
}

enum LineFault {
    Unterminated,
    OpenedAtEol,
}

fn is_junk(ch: u8) -> bool {
    ch == b' ' || ch == b'\t' || ch == b'\r' || ch == b'\n' || ch == b';'
}

/// Finds the end of the meaningful content of the line starting at
/// `pos` (everything before any comment) and the total number of bytes
/// up to the start of the next line.  Quoted strings are skipped over
/// whole so they may contain separators and newlines.
fn scan_line(data: &[u8], pos: usize) -> Result<(usize, usize), LineFault> {
    let len = data.len();
    let in_comment = pos < len && data[pos] == b';';
    let mut lineend = 0;
    let mut linelen = 0;

    while linelen < len - pos {
        match data[pos + linelen] {
            b'\r' => {
                linelen += 1;
                if lineend == 0 && !in_comment {
                    lineend = linelen;
                }
                if pos + linelen < len && data[pos + linelen] == b'\n' {
                    linelen += 1;
                }
                break;
            }
            b'\n' => {
                linelen += 1;
                if lineend == 0 && !in_comment {
                    lineend = linelen;
                }
                if pos + linelen < len && data[pos + linelen] == b'\r' {
                    linelen += 1;
                }
                break;
            }
            b'"' if lineend == 0 && !in_comment => {
                if pos + linelen + 1 >= len {
                    return Err(LineFault::Unterminated);
                }
                if data[pos + linelen + 1] == b'\n' || data[pos + linelen + 1] == b'\r' {
                    return Err(LineFault::OpenedAtEol);
                }
                linelen += 1;
                loop {
                    if pos + linelen >= len {
                        return Err(LineFault::Unterminated);
                    }
                    if data[pos + linelen] == b'"' {
                        break;
                    }
                    linelen += 1;
                }
                linelen += 1;
            }
            b';' => {
                if lineend == 0 {
                    lineend = linelen;
                }
                linelen += 1;
            }
            _ => {
                linelen += 1;
            }
        }
    }

    // end of file without a newline: the rest of the file is the line
    if pos + linelen == len && lineend == 0 && !in_comment {
        lineend = linelen;
    }

    Ok((lineend, linelen))
}

impl<'a> Compiler<'a> {
    pub(crate) fn tokenize(&mut self, modulename: &str, source: &str) -> Result<(), CompileError> {
        let module = self.pool.add(modulename);
        let mut frames = vec![Frame {
            data: source.as_bytes().to_vec(),
            module,
            line: 0,
            pos: 0,
        }];

        loop {
            let top = frames.len() - 1;
            frames[top].line += 1;

            let data = mem::take(&mut frames[top].data);
            let module = frames[top].module;
            let lineno = frames[top].line;
            let pos = frames[top].pos;

            let (lineend, linelen) = match scan_line(&data, pos) {
                Ok(spans) => spans,
                Err(LineFault::Unterminated) => {
                    self.log_at(module, lineno, format_args!("Quoted string never closed."));
                    return Err(CompileError::Tokenize);
                }
                Err(LineFault::OpenedAtEol) => {
                    self.log_at(
                        module,
                        lineno,
                        format_args!("Quoted string opened at end of line."),
                    );
                    return Err(CompileError::Tokenize);
                }
            };

            let mut linectr = frames[top].line;
            let tokens = match self.split_tokens(&data, pos, lineend, &mut linectr) {
                Ok(tokens) => tokens,
                Err(fault) => {
                    match fault {
                        QuoteError::LoneEscape => self.log_at(
                            module,
                            lineno,
                            format_args!("Lone escape char at end of string."),
                        ),
                        QuoteError::InvalidEscape(ch) => self.log_at(
                            module,
                            lineno,
                            format_args!("Invalid escape sequence: \\{}.", ch),
                        ),
                    }
                    return Err(CompileError::Tokenize);
                }
            };
            frames[top].line = linectr;
            frames[top].data = data;

            if !tokens.is_empty() && self.pool.get(tokens[0]) == "include" {
                if tokens.len() != 2 {
                    self.log_at(module, lineno, format_args!("include takes a single filename."));
                    return Err(CompileError::Tokenize);
                }

                if frames.len() >= MAX_INCLUDE_DEPTH {
                    self.log_at(module, lineno, format_args!("Includes too deep."));
                    return Err(CompileError::Tokenize);
                }

                let filename = self.pool.get(tokens[1]).to_string();
                for frame in &frames {
                    if self.pool.get(frame.module) == filename {
                        self.log_at(module, lineno, format_args!("Circular includes."));
                        return Err(CompileError::Tokenize);
                    }
                }

                let included = match fs::read(&filename) {
                    Ok(included) => included,
                    Err(err) => {
                        self.log_at(
                            module,
                            lineno,
                            format_args!("Failed to read include file {}: {}.", filename, err),
                        );
                        return Err(CompileError::Tokenize);
                    }
                };

                // the include line itself is dropped
                frames[top].pos += linelen;
                frames.push(Frame {
                    data: included,
                    module: tokens[1],
                    line: 0,
                    pos: 0,
                });
                continue;
            }

            if !tokens.is_empty() {
                self.lines.push(Line {
                    module,
                    line: lineno,
                    tokens,
                    instruction: 0,
                });
            }
            frames[top].pos += linelen;

            if frames[top].pos == frames[top].data.len() {
                frames.pop();
                if frames.is_empty() {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Splits `data[pos..pos + lineend]` into tokens added to the pool.
    /// `line` is bumped for every newline consumed inside a quoted
    /// string so the module line counter stays accurate.
    fn split_tokens(
        &mut self,
        data: &[u8],
        pos: usize,
        lineend: usize,
        line: &mut u32,
    ) -> Result<Vec<u32>, QuoteError> {
        let mut tokens = Vec::new();
        let mut scanning_junk = true;
        let mut quoted = false;
        let mut tokenstart = 0;
        let mut cursor = 0;

        while cursor < lineend {
            let ch = data[pos + cursor];
            if quoted {
                if ch == b'"' {
                    tokens.push(self.pool.add_quoted(&data[tokenstart..pos + cursor], line)?);
                    scanning_junk = true;
                    quoted = false;
                }
                cursor += 1;
                continue;
            }

            if scanning_junk {
                if is_junk(ch) {
                    cursor += 1;
                    continue;
                }
                if ch == b'"' {
                    // token is the quoted contents, starting past the quote
                    cursor += 1;
                    tokenstart = pos + cursor;
                    quoted = true;
                    continue;
                }
                tokenstart = pos + cursor;
                scanning_junk = false;
                cursor += 1;
                continue;
            }

            if !is_junk(ch) {
                cursor += 1;
                continue;
            }
            tokens.push(self.pool.add_raw(&data[tokenstart..pos + cursor]));
            scanning_junk = true;
            cursor += 1;
        }

        // close a token running up to the end of the span
        if quoted {
            tokens.push(self.pool.add_quoted(&data[tokenstart..pos + cursor], line)?);
        } else if !scanning_junk {
            tokens.push(self.pool.add_raw(&data[tokenstart..pos + cursor]));
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use crate::test::compiler_tokenize;

    fn flat(source: &str) -> Vec<Vec<String>> {
        compiler_tokenize(source).expect("tokenize failed")
    }

    #[test]
    fn splits_on_whitespace() {
        let lines = flat("move a b\n\tadd  a\t1\n");
        assert_eq!(lines, vec![vec!["move", "a", "b"], vec!["add", "a", "1"]]);
    }

    #[test]
    fn comments_and_blanks_dropped() {
        let lines = flat("; a comment\n\nmove a b ; trailing\n   \n");
        assert_eq!(lines, vec![vec!["move", "a", "b"]]);
    }

    #[test]
    fn no_trailing_newline() {
        let lines = flat("move a b");
        assert_eq!(lines, vec![vec!["move", "a", "b"]]);
    }

    #[test]
    fn quoted_string_is_one_token() {
        let lines = flat("static s string \"hello there\"\n");
        assert_eq!(lines, vec![vec!["static", "s", "string", "hello there"]]);
    }

    #[test]
    fn quoted_string_spans_lines() {
        let lines = flat("static s string \"ab\ncd\"\nret\n");
        assert_eq!(
            lines,
            vec![vec!["static", "s", "string", "ab\ncd"], vec!["ret"]]
        );
    }

    #[test]
    fn escaped_newline_continues() {
        let lines = flat("static s string \"ab\\\ncd\"\n");
        assert_eq!(lines, vec![vec!["static", "s", "string", "abcd"]]);
    }

    #[test]
    fn quote_inside_bare_token_is_literal() {
        let lines = flat("move a\"b\" c\n");
        assert_eq!(lines, vec![vec!["move", "a\"b\"", "c"]]);
    }

    #[test]
    fn empty_quoted_string() {
        let lines = flat("static s string \"\" x\n");
        assert_eq!(lines, vec![vec!["static", "s", "string", "", "x"]]);
    }

    #[test]
    fn bad_escape_fails() {
        assert!(compiler_tokenize("static s string \"a\\qb\"\n").is_err());
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(compiler_tokenize("static s string \"abc\n").is_err());
    }
}
