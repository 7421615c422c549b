use std::{
    fs,
    io::{self, BufRead, Write},
};

use anyhow::Context as _;
use ember::{cli::Options, codegen::Codegen, driver::Driver, lexer::Lexer, parser::Parser};
use inkwell::context::Context;
use tracing::info;

/// Feeds `chars` through one session and returns the module IR.
fn run_session<I>(chars: I, codegen: Codegen, options: &Options) -> anyhow::Result<String>
where
    I: Iterator<Item = char>,
{
    // the parser reads its first token on construction, so the first
    // prompt has to come before it
    if options.prompt {
        eprint!("ready> ");
        io::stderr().flush()?;
    }
    let parser = Parser::new(Lexer::new(chars));

    let mut driver = Driver::new(parser, codegen, io::stderr()).with_prompt(options.prompt);
    let summary = driver.run()?;

    if summary.errors > 0 {
        info!(errors = summary.errors, "some forms were discarded");
    }
    Ok(driver.module_ir())
}

/// Characters of `reader`, one line at a time so interactive input is
/// lexed as it arrives. The first read error ends the stream and is left
/// in `error`.
fn chars_until_error<'e, R: BufRead + 'e>(
    reader: R,
    error: &'e mut Option<io::Error>,
) -> impl Iterator<Item = char> + 'e {
    reader
        .lines()
        .map_while(move |line| match line {
            Ok(line) => Some(line.chars().chain(Some('\n')).collect::<Vec<_>>()),
            Err(err) => {
                *error = Some(err);
                None
            }
        })
        .flatten()
}

fn main() -> anyhow::Result<()> {
    let options = Options::from_args();

    tracing_subscriber::fmt()
        .with_max_level(options.log_level())
        .with_writer(io::stderr)
        .init();

    let context = Context::create();
    let codegen = Codegen::new(&context, &options.module_name);

    let ir = match &options.input {
        Some(path) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            run_session(source.chars(), codegen, &options)?
        }
        None => {
            let stdin = io::stdin();
            let mut read_error = None;
            let ir = run_session(
                chars_until_error(stdin.lock(), &mut read_error),
                codegen,
                &options,
            )?;
            if let Some(err) = read_error {
                return Err(err).context("failed to read stdin");
            }
            ir
        }
    };

    match &options.output {
        Some(path) => fs::write(path, ir)
            .with_context(|| format!("failed to write IR to {}", path.display()))?,
        None => eprint!("{}", ir),
    }
    Ok(())
}
