//! Mesh node entry point.
//!
//! Parses CLI arguments, loads the node's TOML config, builds the
//! adapters an HTTP endpoint needs, and runs the node to completion on a
//! dedicated Embassy executor thread: no GUI is in scope for a
//! field-deployed node, and no physical transceiver backend is in scope
//! either, so this binary drives the core against the in-memory
//! `MockRadioDevice` that stands in for hardware throughout the test
//! suite.

use clap::Parser;
use embassy_executor::Executor;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use watchmen_mesh_core::adapters::{FsStorage, HttpUploader, NoMemoryProbe, Uploader};
use watchmen_mesh_core::config::NodeConfig;
use watchmen_mesh_core::node::Node;
use watchmen_mesh_core::radio::MockRadioDevice;

#[derive(Parser, Debug)]
#[command(name = "mesh-node", about = "Runs one mesh protocol node")]
struct Cli {
    /// Path to the node's TOML config file.
    config: PathBuf,

    /// Overrides the default log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

fn init_logging(level: LevelFilter) {
    Builder::new().filter_level(level).filter(Some("watchmen_mesh_core"), level).init();
}

fn build_uploader(config: &NodeConfig) -> Option<Arc<dyn Uploader>> {
    let (endpoint, api_key) = (config.uploader_endpoint.clone()?, config.uploader_api_key.clone().unwrap_or_default());
    match HttpUploader::new(endpoint, api_key) {
        Ok(uploader) => Some(Arc::new(uploader)),
        Err(e) => {
            error!("failed to build uploader client: {e:#}");
            None
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.unwrap_or(LevelFilter::Info));

    info!("loading config from {}", cli.config.display());
    let config = match NodeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.is_command_center && config.uploader_endpoint.is_none() {
        info!("command center {} has no uploader-endpoint configured; uploads will be dropped", config.my_addr);
    }
    let uploader = build_uploader(&config);

    let radio = MockRadioDevice::new(config.my_addr);
    let node = match Node::new(&config, radio, uploader, None, Arc::new(FsStorage), Arc::new(NoMemoryProbe)) {
        Ok(n) => n,
        Err(e) => {
            error!("failed to assemble node: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("starting node {} (command-center={})", config.my_addr, config.is_command_center);

    // Dedicated executor thread, running the async core off the thread
    // that parsed the CLI.
    let handle = thread::Builder::new()
        .name("mesh-executor".to_string())
        .spawn(move || {
            let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
            executor.run(|spawner| {
                let _ = spawner.spawn(run_node(node));
            });
        })
        .expect("failed to spawn mesh executor thread");

    let _ = handle.join();
    ExitCode::SUCCESS
}

#[embassy_executor::task]
async fn run_node(node: Node<MockRadioDevice>) {
    node.run().await;
}
