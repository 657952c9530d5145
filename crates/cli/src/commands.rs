use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Check a catalog file for configuration problems
    Validate {
        #[arg(long, help = "Catalog file path")]
        catalog: String,
    },
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// Print the persisted checkpoint for a stream or source
    Show {
        #[arg(long, help = "State store directory")]
        dir: String,

        #[arg(long, help = "Stream identity, e.g. public.users")]
        stream: Option<String>,

        #[arg(long, help = "Source identity for the change-capture offset")]
        source: Option<String>,
    },
    /// Delete a persisted checkpoint so the next sync starts over
    Reset {
        #[arg(long, help = "State store directory")]
        dir: String,

        #[arg(long, help = "Stream identity, e.g. public.users")]
        stream: Option<String>,

        #[arg(long, help = "Source identity for the change-capture offset")]
        source: Option<String>,
    },
}
