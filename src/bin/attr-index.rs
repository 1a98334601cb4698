//! Process entry point (spec.md §6): loads configuration, initializes
//! logging, installs signal handling, constructs the `Runtime`, and
//! runs the four long-lived workers to completion.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{self, SigHandler, Signal};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;

use evr_attr_index::config::{self, CliOverrides};
use evr_attr_index::runtime::Runtime;
use evr_attr_index::storage::StorageClient;
use evr_attr_index::workers::{build_index, query_server, sync, watch_specs};

/// Attribute index service for the everarch content-addressed archive.
#[derive(Parser, Debug)]
#[command(name = "evr-attr-index", about = "attribute index service for an everarch archive")]
struct Cli {
    /// Directory holding index state (overrides the config file).
    #[arg(long)]
    state_dir_path: Option<PathBuf>,
    /// Host the query listener binds to.
    #[arg(long)]
    host: Option<String>,
    /// Port the query listener binds to.
    #[arg(long)]
    port: Option<u16>,
    /// Host of the blob storage server.
    #[arg(long)]
    storage_host: Option<String>,
    /// Port of the blob storage server.
    #[arg(long)]
    storage_port: Option<u16>,
    /// Seconds between reindex-failed sweeps.
    #[arg(long)]
    reindex_interval_secs: Option<u64>,
}

impl From<Cli> for CliOverrides {
    fn from(cli: Cli) -> Self {
        CliOverrides {
            state_dir_path: cli.state_dir_path,
            host: cli.host,
            port: cli.port,
            storage_host: cli.storage_host,
            storage_port: cli.storage_port,
            reindex_interval_secs: cli.reindex_interval_secs,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse().into()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(overrides: CliOverrides) -> Result<()> {
    let config = config::load(overrides).context("loading configuration")?;
    std::fs::create_dir_all(&config.state_dir_path)
        .with_context(|| format!("creating state directory {:?}", config.state_dir_path))?;

    // SIGPIPE ignored (spec.md §6): a client closing its socket mid-write
    // must surface as a normal I/O error, not terminate the process.
    unsafe {
        signal::signal(Signal::SIGPIPE, SigHandler::SigIgn)
            .map_err(|e| anyhow::anyhow!("failed to ignore SIGPIPE: {}", e))?;
    }

    let mut signals = Signals::new([SIGINT]).context("registering SIGINT handler")?;
    let signals_handle = signals.handle();

    let runtime = Runtime::new();
    let storage_client = StorageClient::new(config.storage_host.clone(), config.storage_port);
    let reindex_interval = Duration::from_secs(config.reindex_interval_secs);

    thread::scope(|scope| -> Result<()> {
        let runtime_ref = &runtime;

        let signal_thread = scope.spawn(move || {
            if signals.forever().next().is_some() {
                log::info!("received SIGINT, shutting down");
            }
            runtime_ref.shutdown();
        });

        let watch_specs_handle = {
            let client = storage_client.clone();
            scope.spawn(move || watch_specs::run(runtime_ref, &client))
        };
        let build_index_handle = {
            let client = storage_client.clone();
            let state_dir = config.state_dir_path.clone();
            scope.spawn(move || build_index::run(runtime_ref, &client, &state_dir))
        };
        let sync_handle = {
            let client = storage_client.clone();
            let state_dir = config.state_dir_path.clone();
            scope.spawn(move || sync::run(runtime_ref, &client, &state_dir, reindex_interval))
        };
        let query_server_handle = {
            let host = config.host.clone();
            let port = config.port;
            scope.spawn(move || query_server::run(runtime_ref, &host, port))
        };

        // Joining sync first: it's the only worker that can return on
        // its own (spec.md §7's fatal DB errors) without a shutdown
        // signal. Shutting down immediately afterwards guarantees the
        // remaining workers unblock even if no SIGINT ever arrived.
        let sync_result = sync_handle.join().expect("sync worker panicked");
        runtime_ref.shutdown();
        signals_handle.close();

        let query_result = query_server_handle.join().expect("query-server worker panicked");
        watch_specs_handle.join().expect("watch-specs worker panicked");
        build_index_handle.join().expect("build-index worker panicked");
        signal_thread.join().expect("signal thread panicked");

        sync_result?;
        query_result?;
        Ok(())
    })
}
