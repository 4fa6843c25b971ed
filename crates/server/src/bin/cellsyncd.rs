// cellsyncd - collaborative spreadsheet server

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;

use cellsync_config::{ServerConfig, StorageBackend};
use cellsync_server::{open_storage, ClientRegistry, Controller, Server, ShutdownHandle};

#[derive(Parser)]
#[command(name = "cellsyncd")]
#[command(about = "Serve spreadsheets to collaborating clients over TCP")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/cellsync/server.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Directory holding stored spreadsheets
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Storage backend: text, sqlite or memory
    #[arg(long)]
    storage: Option<StorageBackend>,

    /// Log at debug level
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cellsyncd: {e}");
            return ExitCode::from(2);
        }
    };

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let storage = match open_storage(&config.storage) {
        Ok(storage) => storage,
        Err(e) => {
            log::error!("Cannot open storage in {}: {}", config.storage.dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let registry = ClientRegistry::new(config.limits.outbound_queue_depth);
    let controller = Arc::new(Controller::new(storage, registry, config.history));
    let server = match Server::start(&config.listen_addr(), config.limits, controller) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Cannot listen on {}: {}", config.listen_addr(), e);
            return ExitCode::FAILURE;
        }
    };

    watch_console(server.shutdown_handle());
    server.wait();
    ExitCode::SUCCESS
}

fn load_config(cli: &Cli) -> Result<ServerConfig, cellsync_config::ConfigError> {
    let path = cli.config.clone().unwrap_or_else(ServerConfig::default_path);
    let mut config = ServerConfig::load(&path)?;

    if let Some(bind) = &cli.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.dir = dir.clone();
    }
    if let Some(backend) = cli.storage {
        config.storage.backend = backend;
    }
    config.validate()?;
    Ok(config)
}

/// Stop the server when `quit` or `exit` is typed on stdin.
fn watch_console(shutdown: ShutdownHandle) {
    let spawned = thread::Builder::new()
        .name("cellsync-console".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "quit" | "exit" => {
                        log::info!("Shutdown requested from console");
                        shutdown.trigger();
                        return;
                    }
                    "" => {}
                    other => log::warn!("Unknown console command {:?} (try quit)", other),
                }
            }
            // Detached stdin: keep serving until killed
        });
    if let Err(e) = spawned {
        log::warn!("Console thread unavailable: {}", e);
    }
}
