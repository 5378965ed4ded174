use clap::Parser;
use std::panic::{self, PanicHookInfo};
use switchbot_listener::app::{Options, RealScanner, run_with_listener};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn log_startup(options: &Options) {
    tracing::info!("switchbot-listener starting");
    tracing::info!(
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        version = env!("CARGO_PKG_VERSION"),
        "runtime"
    );
    match std::env::current_dir() {
        Ok(dir) => tracing::info!(dir = %dir.display(), "working directory"),
        Err(e) => tracing::warn!(error = %e, "cannot determine working directory"),
    }
    tracing::info!(
        listen = %options.listen,
        backend = %options.backend,
        "configuration"
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_tracing(options.verbose);
    log_startup(&options);

    let http = match TcpListener::bind(options.listen).await {
        Ok(listener) => listener,
        Err(why) => {
            tracing::error!(listen = %options.listen, error = %why, "cannot bind metrics endpoint");
            std::process::exit(EXIT_ERROR);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    match run_with_listener(options, &RealScanner, http, shutdown).await {
        Ok(()) => {
            tracing::info!("switchbot-listener stopped");
            std::process::exit(EXIT_SUCCESS);
        }
        Err(why) => {
            tracing::error!(error = %why, "switchbot-listener failed");
            std::process::exit(EXIT_ERROR);
        }
    }
}
