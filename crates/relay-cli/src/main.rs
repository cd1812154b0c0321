mod commands;
mod reply;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relay::peer::PeerClient;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Seconds to wait for the agent before giving up
    #[arg(long, global = true, default_value_t = 60)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the agent card of a running agent
    Card {
        /// Base url of the agent
        #[arg(short, long)]
        url: String,
    },
    /// Send one message and print the reply
    Send {
        /// Base url of the agent
        #[arg(short, long)]
        url: String,
        /// Continue an earlier conversation
        #[arg(short, long)]
        context: Option<String>,
        text: String,
    },
    /// Chat with an agent, keeping one conversation context
    Session {
        /// Base url of the agent
        #[arg(short, long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = PeerClient::new(Duration::from_secs(cli.timeout));

    match cli.command {
        Command::Card { url } => commands::card::run(&client, &url).await,
        Command::Send { url, context, text } => {
            commands::send::run(&client, &url, context, &text).await
        }
        Command::Session { url } => commands::session::run(&client, &url).await,
    }
}
