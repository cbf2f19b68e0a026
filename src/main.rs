use clap::Parser;
use payloadstash::cli::{Cli, Commands};
use payloadstash::error::{Error, ErrorKind};
use payloadstash::fs::OsFileSystem;
use payloadstash::logging;
use payloadstash::orchestrator;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let exit_code = match run_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&e);
            exit_code_for(&e)
        }
    };

    std::process::exit(exit_code);
}

fn exit_code_for(error: &Error) -> i32 {
    match error.kind() {
        ErrorKind::Validation | ErrorKind::OutputWrite => 9,
        ErrorKind::Runtime => 1,
    }
}

/// Expands a leading `~` in a user-supplied path before it reaches the
/// filesystem layer, the way shell-facing CLIs conventionally do.
fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

async fn run_command(cli: Cli) -> Result<i32, Error> {
    let fs = OsFileSystem;

    match cli.command {
        Commands::Validate { config, secrets } => {
            let plan = orchestrator::validate(&fs, &expand_path(&config), secrets.as_deref().map(expand_path).as_deref())?;
            println!("'{}' is valid: {} request(s) across {} sequence(s).", plan.stash_name, plan.requests.len(), plan.sequences.len());
            Ok(0)
        }
        Commands::Resolve { config, out, secrets } => {
            let path = orchestrator::resolve(
                &fs,
                &expand_path(&config),
                secrets.as_deref().map(expand_path).as_deref(),
                out.map(|p| expand_path(&p)),
            )?;
            println!("Resolved document written to {}", path.display());
            Ok(0)
        }
        Commands::Run {
            config,
            out,
            secrets,
            dry_run,
            yes,
        } => {
            if !dry_run && !yes && !confirm(&config)? {
                println!("Aborted.");
                return Ok(0);
            }

            let summary = orchestrator::run(
                &fs,
                &expand_path(&config),
                secrets.as_deref().map(expand_path).as_deref(),
                out.map(|p| expand_path(&p)),
                dry_run,
            )
            .await?;

            println!("Run artifacts written to {}", summary.run_dir.display());
            if dry_run {
                return Ok(0);
            }

            let succeeded = summary.outcomes.iter().filter(|o| o.succeeded()).count();
            println!("{succeeded}/{} requests succeeded", summary.outcomes.len());

            Ok(i32::from(!summary.all_succeeded()))
        }
    }
}

/// Interactive confirmation before a side-effecting run, skipped when
/// stdout isn't a TTY so the CLI stays scriptable.
fn confirm(config: &str) -> Result<bool, Error> {
    if !std::io::stdout().is_terminal() {
        return Ok(true);
    }
    print!("About to send requests described in '{config}'. Proceed? [y/N] ");
    std::io::stdout().flush().map_err(|e| Error::runtime(format!("failed to write prompt: {e}")))?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| Error::runtime(format!("failed to read confirmation: {e}")))?;

    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_error(error: &Error) {
    match error.kind() {
        ErrorKind::Validation => eprintln!("Validation error\n{error}"),
        ErrorKind::OutputWrite => eprintln!("Output-write error\n{error}"),
        ErrorKind::Runtime => eprintln!("Runtime error\n{error}"),
    }
}
