use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "robot-bridge", about = "Robot Studio script execution bridge", version)]
pub struct Cli {
    /// Override interpreter candidates (comma-separated, probed in order).
    #[arg(long, global = true)]
    pub python: Option<String>,

    /// Log filter, e.g. `debug` or `robot_studio_bridge=trace`.
    #[arg(long = "log", global = true)]
    pub log: Option<String>,

    /// Disable colored output.
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve JSON-lines requests on stdin, write responses and events to stdout (default).
    Serve {
        /// Forward every event channel without waiting for `subscribe` requests.
        #[arg(long = "subscribe-all")]
        subscribe_all: bool,
    },
    /// Report the located interpreter and its version.
    CheckVersion,
    /// Run a script file ("-" reads the script from stdin).
    Run {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Install a package with the located interpreter's pip.
    Install {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Check whether a package can be imported.
    Check {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
