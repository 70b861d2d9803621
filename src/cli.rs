use clap::{Parser, Subcommand};

use crate::config::ProviderKind;
use crate::tasks::ResearchState;

#[derive(Parser, Debug)]
#[command(
    name = "logos-author",
    about = "Autonomous terminal agent: a language model driving a real shell",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn a console in a PTY and let the model drive it
    Run {
        /// Override the configured provider (openai, ollama)
        #[arg(long)]
        provider: Option<ProviderKind>,

        /// Override the model of the selected provider
        #[arg(long)]
        model: Option<String>,

        /// Program and arguments to run instead of the configured console
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Show effective configuration
    Config {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Step the research workflow through the given states
    Workflow {
        /// States to visit in order (reading, editing_notes, finalizing_notes)
        #[arg(required = true)]
        targets: Vec<ResearchState>,

        /// Research prompt attached to the starting state
        #[arg(long, default_value = "")]
        prompt: String,
    },
}
