//! MTE session demo CLI
//!
//! Runs a client and an in-process server over the loopback transport.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use mte_core::{
    InMemoryStore, LoopbackTransport, Router, SessionClient, SessionServer, Transport,
    UploadMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, format_bytes};

type DemoClient = SessionClient<LoopbackTransport<InMemoryStore>>;

/// MTE session demo - handshake, echo, login and upload against a local server
#[derive(Parser)]
#[command(name = "mte-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handshake, then echo a message repeatedly
    Roundtrip {
        /// Message to send
        #[arg(short, long, default_value = "hello")]
        message: String,

        /// Number of round trips
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Log in with a user name and password
    Login {
        /// User name
        #[arg(short, long)]
        user: String,

        /// Password
        #[arg(short, long)]
        password: String,
    },

    /// Upload a file
    Upload {
        /// File to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Send the file unencoded
        #[arg(long)]
        plain: bool,

        /// Log in first and use the authenticated endpoint
        #[arg(long)]
        login: bool,
    },

    /// Run many clients concurrently against one server
    MultiClient {
        /// Number of simulated clients
        #[arg(short, long, default_value_t = 4)]
        clients: usize,

        /// Messages per client
        #[arg(short, long, default_value_t = 25)]
        messages: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref())?;
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Roundtrip { message, count } => roundtrip(&config, &message, count).await?,
        Commands::Login { user, password } => login(&config, &user, &password).await?,
        Commands::Upload { file, plain, login } => upload(&config, file, plain, login).await?,
        Commands::MultiClient { clients, messages } => {
            multi_client(&config, clients, messages).await?;
        }
        Commands::Config => print!("{}", config.to_display_toml()?),
    }

    Ok(())
}

fn start_server(config: &Config) -> anyhow::Result<Router<InMemoryStore>> {
    let server = SessionServer::in_memory(config.server.clone())?;
    Ok(Router::new(Arc::new(server)))
}

fn connect(config: &Config, router: &Router<InMemoryStore>) -> anyhow::Result<DemoClient> {
    let transport = LoopbackTransport::new(router.clone());
    Ok(SessionClient::new(config.client.clone(), transport)?)
}

/// Echo `message` `count` times over one conversation
async fn roundtrip(config: &Config, message: &str, count: usize) -> anyhow::Result<()> {
    let router = start_server(config)?;
    let client = connect(config, &router)?;
    println!("Conversation: {}", client.conversation());

    let started = Instant::now();
    for i in 1..=count {
        let reply = client.echo(message).await?;
        if reply != message {
            anyhow::bail!("round trip {i} returned {reply:?}");
        }
    }

    let stats = client.stats();
    let traffic = client.transport().stats();
    println!("Round trips: {count} in {:.2?}", started.elapsed());
    println!("Handshakes: {} ({} reseeds)", stats.handshakes, stats.reseeds);
    println!(
        "Traffic: {} sent, {} received",
        format_bytes(traffic.bytes_sent),
        format_bytes(traffic.bytes_received)
    );
    if let Some([encoder, decoder]) = client.usage().await {
        println!(
            "Counters: encoder {}/{}, decoder {}/{}",
            encoder.counter, encoder.interval, decoder.counter, decoder.interval
        );
    }
    Ok(())
}

async fn login(config: &Config, user: &str, password: &str) -> anyhow::Result<()> {
    let router = start_server(config)?;
    let client = connect(config, &router)?;

    let confirmation = client.login(user, password).await?;
    println!("{confirmation}");
    println!("Conversation: {}", client.conversation());
    Ok(())
}

/// Upload `file`, optionally after logging in
async fn upload(config: &Config, file: PathBuf, plain: bool, login: bool) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let file_size = std::fs::metadata(&file)?.len();
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let mode = if plain { UploadMode::Plain } else { UploadMode::Mte };

    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(file_size));
    println!("Mode: {}", mode.segment());
    println!("Uploads to: {}", config.server.upload_dir.display());

    let router = start_server(config)?;
    let client = connect(config, &router)?;
    if login {
        client.login("demo", "demo").await?;
    }

    let progress = TransferProgress::new(file_size, filename);
    let bar = progress.handle();
    match client
        .upload_file(&file, mode, login, move |sent| bar.set_position(sent))
        .await
    {
        Ok(summary) => {
            progress.finish_with_message(summary);
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

/// One task per simulated client, all against one server
async fn multi_client(config: &Config, clients: usize, messages: usize) -> anyhow::Result<()> {
    let router = start_server(config)?;
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(clients);
    for n in 0..clients {
        let client = connect(config, &router)?;
        tasks.push(tokio::spawn(async move {
            for i in 0..messages {
                let message = format!("client {n} message {i}");
                let reply = client.echo(&message).await?;
                if reply != message {
                    anyhow::bail!("client {n} got {reply:?} for {message:?}");
                }
            }
            Ok::<_, anyhow::Error>((client.conversation().clone(), client.stats()))
        }));
    }

    let mut failures = 0usize;
    for task in tasks {
        match task.await? {
            Ok((conversation, stats)) => println!(
                "{}: {messages} messages, {} handshakes",
                conversation.short(),
                stats.handshakes
            ),
            Err(e) => {
                failures += 1;
                tracing::error!(error = %e, "client failed");
            }
        }
    }

    println!(
        "{} clients, {} failed, {:.2?}",
        clients,
        failures,
        started.elapsed()
    );
    if failures > 0 {
        anyhow::bail!("{failures} of {clients} clients failed");
    }
    Ok(())
}
