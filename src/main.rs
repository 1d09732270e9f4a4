use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use wsregress::config::{HarnessConfig, LoggingConfig};
use wsregress::listener::ReferenceListener;
use wsregress::report::{self, ConsoleSink, LogSink, NullSink};
use wsregress::scenarios::default_suite;
use wsregress::sequencer::RunHandle;

#[derive(Parser)]
#[command(
    name = "wsregress",
    about = "Sequential regression harness for WebSocket servers",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $WSREGRESS_CONFIG, then ./wsregress.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the regression suite against a server
    Run {
        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Plain WebSocket port (TLS tests use port + 1)
        #[arg(long)]
        port: Option<u16>,

        /// Skip a test by name (repeatable)
        #[arg(long, value_name = "NAME")]
        disable: Vec<String>,

        /// Run only the named tests (repeatable)
        #[arg(long, value_name = "NAME")]
        only: Vec<String>,

        /// Invert the selection after --only/--disable are applied
        #[arg(long)]
        invert: bool,

        /// Connection open timeout
        #[arg(long)]
        connect_timeout_ms: Option<u64>,

        /// Give up waiting for an echo after this long (default: wait forever)
        #[arg(long)]
        reply_timeout_ms: Option<u64>,

        /// Settle window after the burst test
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Print the run report as JSON instead of the event stream
        #[arg(long)]
        json: bool,
    },

    /// List the tests in execution order
    List,

    /// Run the reference echo listener (plain on PORT, TLS on PORT + 1)
    Listen {
        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// Plain WebSocket port
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    // Diagnostics go to stderr; stdout carries the event stream or the report.
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run {
            host,
            port,
            disable,
            only,
            invert,
            connect_timeout_ms,
            reply_timeout_ms,
            settle_ms,
            json,
        } => {
            if let Some(host) = host {
                config.target.host = host;
            }
            if let Some(port) = port {
                config.target.port = port;
            }
            if let Some(ms) = connect_timeout_ms {
                config.probe.connect_timeout_ms = ms;
            }
            if reply_timeout_ms.is_some() {
                config.probe.reply_timeout_ms = reply_timeout_ms;
            }
            if let Some(ms) = settle_ms {
                config.burst.settle_ms = ms;
            }

            let mut registry = default_suite()?;
            config.apply_selection(&mut registry)?;
            if !only.is_empty() {
                registry.select_only(&only)?;
            }
            for name in &disable {
                registry.set_enabled(name, false)?;
            }
            if invert {
                registry.invert_selection();
            }

            let handle = RunHandle::new();
            let stopper = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, stopping run");
                    stopper.stop();
                }
            });

            let sink: Arc<dyn LogSink> = if json {
                Arc::new(NullSink)
            } else {
                Arc::new(ConsoleSink)
            };
            let report = wsregress::run_suite(&config, &registry, sink, &handle).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!();
                println!("{}", report::format_summary(&report));
            }

            return Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::List => {
            let mut registry = default_suite()?;
            config.apply_selection(&mut registry)?;

            println!("{:<8} | {:<8} | Name", "Test", "Enabled");
            println!("{:-<8}-|-{:-<8}-|-{:-<40}", "", "", "");
            for (id, name) in registry.names().iter().enumerate() {
                let enabled = registry.is_enabled(name).unwrap_or(false);
                println!(
                    "{:<8} | {:<8} | {}",
                    format!("TEST-{}", id),
                    if enabled { "yes" } else { "no" },
                    name
                );
            }
        }
        Commands::Listen { host, port } => {
            let host = host.unwrap_or_else(|| config.target.host.clone());
            let port = port.unwrap_or(config.target.port);

            let listener = ReferenceListener::bind(&host, port)
                .await
                .with_context(|| format!("failed to start listener on {}:{}", host, port))?;
            println!();
            println!("  wsregress reference listener");
            println!("  ============================");
            println!("  Plain : ws://{}", listener.plain_addr()?);
            println!("  TLS   : wss://{}", listener.tls_addr()?);
            println!();

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                trigger.cancel();
            });
            listener.run(shutdown).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
