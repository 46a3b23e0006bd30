//! HTTP server: `topomap serve`.

use anyhow::Result;
use tracing::warn;

use topomap::config::AppConfig;

pub async fn cmd_serve(config: &AppConfig) -> Result<()> {
    for warning in config.validate() {
        warn!(config = %config.path.display(), "{}", warning);
    }
    topomap::server::start_server(&config.toml).await
}
