use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kube-deployer")]
#[command(about = "Deploy, list, stop and tail integration resources in a Kubernetes cluster")]
pub struct Cli {
    /// Namespace used when a command doesn't name one
    #[arg(long, env = "KUBE_DEPLOYER_NAMESPACE", default_value = "default", global = true)]
    pub default_namespace: String,

    /// Namespace for this command
    #[arg(short = 'n', long, global = true)]
    pub namespace: Option<String>,

    /// Context
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// YAML file with extra dialect definitions, tried after the built-in ones
    #[arg(long, global = true)]
    pub dialects: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// List deployed resources
    List,

    /// Deploy a resource description
    Start {
        /// File to read, or "-" for stdin
        #[arg(short = 'f', long)]
        file: PathBuf,

        /// Only try this dialect
        #[arg(short = 'd', long)]
        dialect: Option<String>,
    },

    /// Print a deployed resource
    Get {
        name: String,

        #[arg(short = 'd', long)]
        dialect: Option<String>,
    },

    /// Delete a deployed resource
    Stop {
        name: String,

        #[arg(short = 'd', long)]
        dialect: Option<String>,
    },

    /// Follow the log of a deployed resource
    Logs {
        name: String,

        #[arg(short = 'd', long)]
        dialect: Option<String>,

        /// Number of lines to show from the end of the logs
        #[arg(long)]
        tail: Option<i64>,

        /// Only show lines matching this regex
        #[arg(long)]
        grep: Option<String>,
    },

    /// List the supported dialects
    Dialects,

    /// Print the default namespace
    Namespace,
}
