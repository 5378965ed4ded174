//! Core application runner for `switchbot-listener`.
//!
//! Decoupled from CLI parsing, logging setup and process exit codes so it can be
//! driven deterministically with an injected scanner and a local TCP listener.

use crate::advertisement::Advertisement;
use crate::exporter::PrometheusExporter;
use crate::instrumentation::{InstrumentationOptions, add_switchbot_instrumentation};
use crate::scanner::{Backend, ScanError};
use clap::Parser;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

/// Configuration for the exporter.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Forget sensors that have not been heard from for longer than this.
    /// Accepts duration with suffix: 90s, 5m, 1h. Without suffix, seconds.
    #[arg(long, default_value = "60", value_parser = crate::duration::parse_duration)]
    pub stale_threshold: Duration,

    /// Address of the Prometheus scrape endpoint
    #[arg(long, default_value = "127.0.0.1:9464")]
    pub listen: SocketAddr,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn instrumentation(&self) -> InstrumentationOptions {
        InstrumentationOptions {
            stale_threshold: self.stale_threshold,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Future resolving to the advertisement stream of a started scan.
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + 'a>>;

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(&self, backend: Backend) -> ScanFuture<'_>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(&self, backend: Backend) -> ScanFuture<'_> {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Run the exporter: record advertisements from `scanner` and serve metrics on `http`.
///
/// Returns when `shutdown` resolves or when the scanner closes its stream,
/// whichever comes first. The HTTP server is shut down gracefully in both cases.
pub async fn run_with_listener<F>(
    options: Options,
    scanner: &dyn Scanner,
    http: TcpListener,
    shutdown: F,
) -> Result<(), RunError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut exporter = PrometheusExporter::new();
    let registry = add_switchbot_instrumentation(&mut exporter, options.instrumentation());
    tracing::info!(
        stale_threshold_secs = registry.stale_threshold().as_secs_f64(),
        "sensor registry ready"
    );

    let advertisements = scanner.start_scan(options.backend).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serve = crate::server::serve(http, Arc::new(exporter), async move {
        tokio::select! {
            _ = shutdown => tracing::info!("shutdown requested"),
            _ = stop_rx => {}
        }
    });
    tokio::pin!(serve);

    let listen = crate::listener::listen(&registry, advertisements);
    tokio::pin!(listen);

    tokio::select! {
        _ = &mut listen => {
            let _ = stop_tx.send(());
            serve.await?;
        }
        result = &mut serve => result?,
    }

    Ok(())
}
