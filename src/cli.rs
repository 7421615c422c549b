use std::{ffi::OsString, path::PathBuf};

use clap::{crate_version, App, Arg, ArgMatches};
use tracing::Level;

pub const DEFAULT_MODULE_NAME: &str = "ember";

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// source file, stdin when absent
    pub input: Option<PathBuf>,
    /// where the final module IR goes, the diagnostic stream when absent
    pub output: Option<PathBuf>,
    pub prompt: bool,
    pub module_name: String,
    pub verbosity: u64,
}

fn app() -> App<'static, 'static> {
    App::new("ember")
        .version(crate_version!())
        .about("the ember language front end: reads source and prints LLVM IR")
        .arg(
            Arg::with_name("INPUT")
                .help("source file to compile, reads stdin when omitted")
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("FILE")
                .takes_value(true)
                .help("write the final module IR to FILE"),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("don't print the ready> prompt"),
        )
        .arg(
            Arg::with_name("module-name")
                .long("module-name")
                .value_name("NAME")
                .takes_value(true)
                .default_value(DEFAULT_MODULE_NAME)
                .help("name of the generated LLVM module"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("increase log verbosity, may be repeated"),
        )
}

impl Options {
    pub fn from_args() -> Self {
        Self::from_matches(&app().get_matches())
    }

    pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        app()
            .get_matches_from_safe(args)
            .map(|matches| Self::from_matches(&matches))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Options {
            input: matches.value_of_os("INPUT").map(PathBuf::from),
            output: matches.value_of_os("output").map(PathBuf::from),
            prompt: !matches.is_present("quiet"),
            module_name: matches
                .value_of("module-name")
                .unwrap_or(DEFAULT_MODULE_NAME)
                .to_string(),
            verbosity: matches.occurrences_of("verbose"),
        }
    }

    pub fn log_level(&self) -> Level {
        match self.verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}
