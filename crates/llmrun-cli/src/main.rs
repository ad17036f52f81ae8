use std::io;

use clap::Parser;
use llmrun_cli::{describe_reference, error_chain, run_generate, GenerateArgs};
use llmrun_runtime::ReferenceConfig;

/// llmrun: streaming, cancellable generation on a tiny reference model
#[derive(Parser)]
#[command(name = "llmrun")]
struct Cli {
    /// Log filter level written to stderr (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Generate text from a prompt, streaming it to stdout.
    Generate {
        #[command(flatten)]
        args: GenerateArgs,

        /// Print generation statistics as JSON on stderr.
        #[arg(long)]
        stats: bool,
    },
    /// Print the reference engine configuration.
    Info,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Generate { args, stats } => {
            let mut stdout = io::stdout().lock();
            match run_generate(&args, &mut stdout) {
                Ok(report) => {
                    if stats {
                        if let Some(s) = report.stats {
                            match serde_json::to_string_pretty(&s) {
                                Ok(json) => eprintln!("{json}"),
                                Err(e) => eprintln!("error: {e}"),
                            }
                        }
                    }
                }
                Err(e) => {
                    eprintln!("error: {}", error_chain(&e));
                    std::process::exit(1);
                }
            }
        }
        Command::Info => {
            println!("{}", describe_reference(&ReferenceConfig::default()));
        }
    }
}
