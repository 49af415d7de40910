//! Portal server command: `civic serve`.

use anyhow::Result;
use civic_report::config::CivicToml;
use civic_report::portal::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: &CivicToml,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    let warnings = config.validate();
    for warning in &warnings {
        tracing::warn!(%warning, "Configuration warning");
    }

    let mut server = ServerConfig::from_toml(config);
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }
    server.dev_mode |= dev;

    start_server(server).await
}
