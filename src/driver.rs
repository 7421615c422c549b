use std::{fmt, io::Write};

use inkwell::values::AnyValue;
use tracing::{debug, info, warn};

use crate::{codegen::Codegen, lexer::Token, parser::Parser};

/// Counts of what a session did, reported once input is exhausted.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Summary {
    pub definitions: usize,
    pub externs: usize,
    pub expressions: usize,
    pub errors: usize,
}

/// Feeds one top-level form at a time from the parser into codegen and
/// reports each result on `out`.
pub struct Driver<'a, I: Iterator<Item = char>, W: Write> {
    parser: Parser<I>,
    codegen: Codegen<'a>,
    out: W,
    prompt: bool,
    summary: Summary,
}

impl<'a, I: Iterator<Item = char>, W: Write> Driver<'a, I, W> {
    pub fn new(parser: Parser<I>, codegen: Codegen<'a>, out: W) -> Self {
        Driver {
            parser,
            codegen,
            out,
            prompt: true,
            summary: Summary::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn codegen(&self) -> &Codegen<'a> {
        &self.codegen
    }

    /// Runs until the end of input.
    ///
    /// Only failures to write to `out` end the session early; parse and
    /// codegen errors are reported and the next form is attempted.
    pub fn run(&mut self) -> std::io::Result<Summary> {
        info!("session started");

        loop {
            match self.parser.current() {
                Token::Eof => break,
                Token::Char(';') => {
                    self.parser.next_token();
                }
                Token::Func => self.handle_definition()?,
                Token::Extern => self.handle_extern()?,
                _ => self.handle_top_level_expression()?,
            }
            self.write_prompt()?;
        }

        info!(
            definitions = self.summary.definitions,
            externs = self.summary.externs,
            expressions = self.summary.expressions,
            errors = self.summary.errors,
            "session finished"
        );
        Ok(self.summary)
    }

    /// Textual IR of everything the session defined or declared.
    pub fn module_ir(&self) -> String {
        self.codegen.print_module()
    }

    pub fn write_prompt(&mut self) -> std::io::Result<()> {
        if self.prompt {
            write!(self.out, "ready> ")?;
            self.out.flush()?;
        }
        Ok(())
    }

    fn handle_definition(&mut self) -> std::io::Result<()> {
        let function = match self.parser.parse_definition() {
            Ok(function) => function,
            Err(err) => return self.skip(err),
        };
        debug!(%function, "parsed definition");

        match self.codegen.compile_fn(&function) {
            Ok(value) => {
                self.summary.definitions += 1;
                writeln!(self.out, "Read function definition:")?;
                writeln!(self.out, "{}", value.print_to_string().to_string())
            }
            Err(err) => self.report(err),
        }
    }

    fn handle_extern(&mut self) -> std::io::Result<()> {
        let proto = match self.parser.parse_extern() {
            Ok(proto) => proto,
            Err(err) => return self.skip(err),
        };
        debug!(%proto, "parsed extern");

        match self.codegen.compile_proto(&proto) {
            Ok(value) => {
                self.summary.externs += 1;
                write!(self.out, "Read extern: ")?;
                writeln!(self.out, "{}", value.print_to_string().to_string())
            }
            Err(err) => self.report(err),
        }
    }

    fn handle_top_level_expression(&mut self) -> std::io::Result<()> {
        let function = match self.parser.parse_top_level_expr() {
            Ok(function) => function,
            Err(err) => return self.skip(err),
        };
        debug!(body = %function.body, "parsed top-level expression");

        match self.codegen.compile_fn(&function) {
            Ok(value) => {
                self.summary.expressions += 1;
                writeln!(self.out, "Read top-level expression:")?;
                writeln!(self.out, "{}", value.print_to_string().to_string())?;
                self.codegen.remove(value);
                Ok(())
            }
            Err(err) => self.report(err),
        }
    }

    /// Reports a parse error and drops the offending token.
    fn skip(&mut self, err: impl fmt::Display) -> std::io::Result<()> {
        self.report(err)?;
        let token = self.parser.next_token();
        debug!(%token, "resuming after parse error");
        Ok(())
    }

    fn report(&mut self, err: impl fmt::Display) -> std::io::Result<()> {
        self.summary.errors += 1;
        warn!(%err, "discarding top-level form");
        writeln!(self.out, "Error: {}", err)
    }
}
