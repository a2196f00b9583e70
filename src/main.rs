//! msgproc - Message processor for real-time servers
//!
//! Serves the built-in messages over TCP and provides a probing client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use msgproc::config::{self, Config, ConfigError, ConfigResult};
use msgproc::messages::{self, Echo, Notice, Ping, Pong};
use msgproc::network::{resolve_host, Client, Server, Session};
use msgproc::protocol::DEFAULT_PORT;
use msgproc::{Processor, RouterBuilder};

/// msgproc - Message registry, codec and dispatcher
#[derive(Parser)]
#[command(name = "msgproc")]
#[command(version = "0.1.0")]
#[command(about = "Serve and probe ID-framed messages over TCP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the message server
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ping a server and report round-trip times
    Ping {
        /// Server host name or IP address (an ip:port pair overrides --port)
        #[arg(short, long, default_value = "127.0.0.1")]
        server: String,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Number of pings to send
        #[arg(short = 'n', long, default_value_t = 4)]
        count: u32,

        /// Send a notice before pinging
        #[arg(long)]
        notice: Option<String>,
    },

    /// List the registered messages
    Messages,

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, load_error) = match &cli.config {
        Some(config_path) => (Config::load(config_path)?, None),
        None => with_fallback(Config::load_default()),
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let file_layer = config
        .general
        .open_log_file()
        .context("Cannot open log file")?
        .map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(filter)
        .init();

    if let Some(e) = load_error {
        tracing::warn!("Ignoring default configuration file, using defaults: {}", e);
    }

    match cli.command {
        Commands::Serve { port } => {
            run_server(config, port).await?;
        }
        Commands::Ping {
            server,
            port,
            count,
            notice,
        } => {
            run_ping(config, &server, port, count, notice).await?;
        }
        Commands::Messages => {
            list_messages(&config)?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Fall back to the default configuration, keeping the error for logging
fn with_fallback(result: ConfigResult<Config>) -> (Config, Option<ConfigError>) {
    match result {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    }
}

async fn run_server(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let mut net_config = config.network_config();
    if let Some(port) = port {
        net_config.port = port;
    }

    tracing::info!(
        "Starting {} ({:?} byte order)",
        config.general.name,
        net_config.byte_order
    );

    let (router, router_handle) = RouterBuilder::<Session>::new()
        .workers(config.router.workers)
        .route::<Notice, _, _>(|notice, session| async move {
            tracing::info!("Notice from {} [{}]: {}", session.addr(), session.id(), notice.text);
        })
        .spawn();

    let processor = messages::server_processor(net_config.byte_order, Some(Arc::new(router)))?;
    let server = Server::bind(net_config).await?;

    server
        .serve(Arc::new(processor), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    router_handle.shutdown().await;
    Ok(())
}

async fn run_ping(
    config: Config,
    server: &str,
    port: u16,
    count: u32,
    notice: Option<String>,
) -> anyhow::Result<()> {
    let net_config = config.network_config();

    let addr: SocketAddr = match server.parse() {
        Ok(addr) => addr,
        Err(_) => resolve_host(server, port)
            .await
            .with_context(|| format!("Cannot resolve {}", server))?,
    };

    let mut builder = Processor::<()>::builder();
    builder.set_byte_order(net_config.byte_order);
    messages::register_builtin(&mut builder)?;
    builder.set_handler::<Pong, _>(|pong, _| {
        let rtt_us = messages::now_us().saturating_sub(pong.sent_at_us);
        println!("Pong seq={} time={:.3} ms", pong.seq, rtt_us as f64 / 1000.0);
    })?;
    let processor = Arc::new(builder.build());

    let mut client = Client::connect(addr, &net_config, processor.clone()).await?;

    if let Some(text) = notice {
        client.send(&Notice { text }).await?;
    }

    for seq in 0..count {
        let ping = Ping {
            seq,
            sent_at_us: messages::now_us(),
        };
        client.send(&ping).await?;

        match client.recv_timeout(Duration::from_secs(5)).await? {
            Some(decoded) => processor.route(decoded, ())?,
            None => anyhow::bail!("Server closed the connection"),
        }

        if seq + 1 < count {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    let echo = Echo {
        data: config.general.name.into_bytes(),
    };
    client.send(&echo).await?;
    match client.recv_timeout(Duration::from_secs(5)).await? {
        Some(decoded) => match decoded.into_message::<Echo>() {
            Some(reply) if reply.data == echo.data => println!("Echo ok ({} bytes)", reply.data.len()),
            _ => println!("Echo mismatch"),
        },
        None => anyhow::bail!("Server closed the connection"),
    }

    client.close().await?;
    Ok(())
}

fn list_messages(config: &Config) -> anyhow::Result<()> {
    let processor = messages::server_processor(config.protocol.byte_order, None)?;

    println!("{:>5}  {:<20} {:<8} {}", "ID", "TAG", "FORMAT", "ATTACHED");
    for info in processor.messages() {
        let mut attached = Vec::new();
        if info.has_handler() {
            attached.push("handler");
        }
        if info.has_router() {
            attached.push("router");
        }
        if info.has_raw_handler() {
            attached.push("raw");
        }

        println!(
            "{:>5}  {:<20} {:<8} {}",
            info.id(),
            info.tag(),
            info.format(),
            attached.join(", ")
        );
    }

    Ok(())
}
