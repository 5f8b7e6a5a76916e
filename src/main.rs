//! OpenFin adapter CLI - talk to the runtime message bus from a terminal.
//!
//! This is the main binary entry point. See the `openfin_adapter` library
//! for the core functionality.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use openfin_adapter::{Client, Config, SubscriptionKey, SystemAction};
use serde_json::Value;

// CLI
#[derive(Parser)]
#[command(name = "openfin-adapter")]
#[command(version)]
#[command(about = "Client for the OpenFin runtime message bus")]
struct Cli {
    /// Bus port (skips launching the runtime)
    #[arg(long, global = true, conflicts_with_all = ["launcher", "runtime_version"])]
    port: Option<u16>,

    /// Launcher executable used to start the runtime
    #[arg(long, global = true)]
    launcher: Option<PathBuf>,

    /// Runtime version to launch
    #[arg(long, global = true)]
    runtime_version: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the runtime version
    Version,
    /// Print the effective configuration
    Config,
    /// Publish a message to every subscriber of a topic
    Publish {
        /// Topic name
        topic: String,
        /// Message body (parsed as JSON)
        message: String,
    },
    /// Send a message to a specific destination
    Send {
        /// Topic name
        topic: String,
        /// Message body (parsed as JSON)
        message: String,
        /// Destination application uuid
        #[arg(long)]
        uuid: Option<String>,
        /// Destination window name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print messages for a topic until interrupted
    Subscribe {
        /// Topic name
        topic: String,
        /// Source application uuid
        #[arg(long)]
        uuid: Option<String>,
        /// Source window name
        #[arg(long)]
        name: Option<String>,
    },
    /// Run a system action by its wire name (e.g. get-rvm-info)
    System {
        /// Wire action name
        action: String,
    },
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load()?;
        if let Some(port) = self.port {
            config.port = port;
            config.launch = None;
        }
        if let Some(launcher) = &self.launcher {
            config.launch.get_or_insert_with(Default::default).launcher = launcher.clone();
        }
        if let Some(version) = &self.runtime_version {
            config
                .launch
                .get_or_insert_with(Default::default)
                .runtime_version = version.clone();
        }
        Ok(config)
    }
}

fn parse_message(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Message is not valid JSON: {raw}"))
}

fn print_result(result: Option<Value>) -> Result<()> {
    match result {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("(no result)"),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    if matches!(cli.command, Commands::Config) {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let client = Client::connect(&config).await?;
    let outcome = execute(&client, cli.command).await;
    client.close().await;
    outcome
}

async fn execute(client: &Client, command: Commands) -> Result<()> {
    match command {
        Commands::Config => Ok(()),
        Commands::Version => print_result(client.system().get_version().await?),
        Commands::Publish { topic, message } => {
            client.publish(topic.as_str(), parse_message(&message)?).await?;
            Ok(())
        }
        Commands::Send {
            topic,
            message,
            uuid,
            name,
        } => {
            let key = SubscriptionKey::new(uuid.as_deref(), name.as_deref(), Some(topic.as_str()));
            client.send(key, parse_message(&message)?).await?;
            Ok(())
        }
        Commands::Subscribe { topic, uuid, name } => {
            let key = SubscriptionKey::new(uuid.as_deref(), name.as_deref(), Some(topic.as_str()));
            let registration = client
                .subscribe(key, |message| println!("{message}"))
                .await?;
            log::info!("Subscribed ({}), press Ctrl-C to stop", registration.id);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")
        }
        Commands::System { action } => {
            print_result(client.system().call(SystemAction::Other(action)).await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    run(Cli::parse()).await
}
