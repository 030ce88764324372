pub mod agent;
pub mod agent_config;
pub mod bridge;
pub mod capture;
pub mod config_channel;
pub mod error;
pub mod model_sync;
pub mod models;
pub mod recording;
pub mod settings;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod testing;

use agent_config::AgentConfig;

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("edgewatch starting up...");

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("Configuration error: {err}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("Failed to start the async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(agent::start(config)) {
        log::error!("Fatal: {err:#}");
        std::process::exit(1);
    }

    log::info!("edgewatch stopped");
}
