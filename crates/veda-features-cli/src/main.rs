use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use veda_features_cli::commands::{domain, settings, synth};

#[derive(Parser, Debug)]
#[command(author, version, about = "VEDA features API deployment tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synthesize the CloudFormation template from VEDA_* environment variables.
    Synth {
        /// Write the template to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Pretty-print the JSON.
        #[arg(long)]
        pretty: bool,
    },
    /// Print the resolved deployment settings as JSON.
    Settings,
    /// Print the features API domain name, or nothing when custom subdomains are disabled.
    DomainName {
        /// Use the alternate hosted zone.
        #[arg(long)]
        alt_domain: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Synth { output, pretty } => synth::handle_synth(output.as_deref(), pretty),
        Command::Settings => settings::handle_settings(),
        Command::DomainName { alt_domain } => domain::handle_domain_name(alt_domain),
    }
}

/// Logs go to stderr so stdout stays valid JSON.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
