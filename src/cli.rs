//! CLI argument parsing for Revivir

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "revivir")]
#[command(version)]
#[command(about = "Runtime trace capture for time-travel debugging", long_about = None)]
pub struct Cli {
    /// Program image (JSON) to instrument and run
    pub image: PathBuf,

    /// Entry class, slash- or dot-qualified; defaults to the image's first class
    #[arg(value_name = "CLASS")]
    pub entry: Option<String>,

    /// Capture object-graph snapshots of traced reference values
    #[arg(short = 't', long = "traverse")]
    pub traverse: bool,

    /// Only instrument classes whose sources live under this directory
    #[arg(short = 'p', long = "path", value_name = "DIR")]
    pub path: Option<PathBuf>,

    /// Only instrument classes under this package prefix (wins over --path)
    #[arg(short = 'P', long = "package", value_name = "PKG")]
    pub package: Option<String>,

    /// Extra source extensions to recognize besides .java (e.g. -f kt)
    #[arg(short = 'f', long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Directory for trace artifacts
    #[arg(long = "out-dir", value_name = "DIR", default_value = crate::config::DEFAULT_ARTIFACT_DIR)]
    pub out_dir: PathBuf,

    /// Raw activation string, e.g. "t-P=demo/"; overrides the flags above
    #[arg(long = "agent-args", value_name = "ARGS")]
    pub agent_args: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}
