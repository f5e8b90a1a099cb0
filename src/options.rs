// ============================================================================
// options.rs — Command-line arguments (CLI)
// ============================================================================

use clap::Parser;
use std::path::PathBuf;

/// A `KEY=PATH` or `FROM=TO` pair, used for the repeatable
/// `--manually-generated` and `--remap` flags.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) => Ok(KeyValue {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => Err(format!("expected KEY=VALUE, got `{s}`")),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ninja-lower")]
#[command(
    about = "Lowers a Ninja build graph into declarative build-system targets",
    long_about = None
)]
pub struct Options {
    /// Path to the root Ninja build file
    pub ninja_file: PathBuf,

    /// Path to the project's source root
    pub source_root: PathBuf,

    /// Declares an output as manually generated: KEY=PATH (repeatable)
    #[arg(short = 'm', long = "manually-generated", value_name = "KEY=PATH")]
    pub manually_generated: Vec<KeyValue>,

    /// Rewrites a generated-file path before recording it: FROM=TO (repeatable)
    #[arg(long = "remap", value_name = "FROM=TO")]
    pub remap: Vec<KeyValue>,

    /// Initial directory prefix under the source root
    #[arg(short = 'p', long = "prefix")]
    pub prefix: Option<PathBuf>,

    /// CCImport manifest file (repeatable)
    #[arg(long = "imports", value_name = "FILE")]
    pub imports: Vec<PathBuf>,

    /// Verbose output (parse/lowering trace)
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode: only warnings, errors, and the final summary
    #[arg(short, long)]
    pub quiet: bool,

    /// Override the generator cache root (default: $HOME/.cache/ninja-lower)
    #[arg(long = "cache-dir", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl Options {
    /// If both verbose and quiet are set, quiet takes precedence.
    pub fn show_verbose_output(&self) -> bool {
        self.verbose && !self.quiet
    }

    pub fn show_quiet_output(&self) -> bool {
        self.quiet
    }
}
