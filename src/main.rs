use log::{error, info, warn};
use std::sync::Arc;

use timetable_solver::config::ServerConfig;
use timetable_solver::http_oracle::HttpOracle;
use timetable_solver::oracle::{NoOracle, Oracle};
use timetable_solver::server;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    let oracle: Arc<dyn Oracle> = match &config.oracle_url {
        Some(url) => match HttpOracle::new(url, config.oracle_timeout) {
            Ok(oracle) => {
                info!("Using advisory service at {}", url);
                Arc::new(oracle)
            }
            Err(e) => {
                warn!("Advisory service disabled: {}", e);
                Arc::new(NoOracle)
            }
        },
        None => Arc::new(NoOracle),
    };

    if let Err(e) = server::run_server(&config, oracle).await {
        error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}
