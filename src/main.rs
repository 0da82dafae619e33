use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

#[derive(Parser)]
#[command(
    name = "luke",
    version,
    about = "Word and entity encoder with fused self-attention"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a model config as JSON
    Config(cli::config::ConfigArgs),
    /// Print parameter counts per component
    Summary(cli::summary::SummaryArgs),
    /// Run the pretraining forward pass on a synthetic batch
    Forward(cli::forward::ForwardArgs),
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Command::Config(args) => cli::config::cmd_config(args),
        Command::Summary(args) => cli::summary::cmd_summary(args),
        Command::Forward(args) => cli::forward::cmd_forward(args),
    }
}
