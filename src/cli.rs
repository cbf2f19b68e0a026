use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Declarative HTTP fetch-and-archive engine",
    long_about = "PayloadStash sends a document's worth of declaratively-described HTTP\n\
                  requests and archives every response, resolved config, and results table\n\
                  into a run directory.\n\n\
                  Examples:\n  \
                  payloadstash run stash.yml --secrets secrets.env\n  \
                  payloadstash validate stash.yml\n  \
                  payloadstash resolve stash.yml --out ./resolved"
)]
pub struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate, resolve, and send every request in a stash document
    #[command(long_about = "Validates the document, resolves every request, and sends them \
                      in authored order, archiving responses, the resolved document, a \
                      results table, and a run log into the output directory.")]
    Run {
        /// Path to the stash document (YAML)
        config: String,
        /// Output root directory; artifacts land under <out>/<stash-name>/<run-timestamp>/ (default: .)
        #[arg(long, value_name = "DIR")]
        out: Option<String>,
        /// Path to a KEY=VALUE secrets file
        #[arg(long, value_name = "FILE")]
        secrets: Option<String>,
        /// Resolve and print the plan without sending any requests
        #[arg(long)]
        dry_run: bool,
        /// Skip the interactive confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Validate a stash document without sending any requests
    Validate {
        /// Path to the stash document (YAML)
        config: String,
        /// Path to a KEY=VALUE secrets file (only checked for key presence)
        #[arg(long, value_name = "FILE")]
        secrets: Option<String>,
    },
    /// Resolve a stash document and write the resolved document to disk
    Resolve {
        /// Path to the stash document (YAML)
        config: String,
        /// Output root directory; the resolved document lands under <out>/<stash-name>/<run-timestamp>/ (default: .)
        #[arg(long, value_name = "DIR")]
        out: Option<String>,
        /// Path to a KEY=VALUE secrets file
        #[arg(long, value_name = "FILE")]
        secrets: Option<String>,
    },
}
