//! Tandem relay server.
//!
//! ```text
//! tandem-server [BIND_ADDR]
//! ```
//!
//! `TANDEM_BIND` sets the bind address (the argument wins), `TANDEM_NAME`
//! the name the server logs under. Logging follows `RUST_LOG`.
//!
//! Peers connect by address, to `ws://<BIND_ADDR>/doc/{docId}`. Service
//! names only resolve inside one process, so the binary advertises none.

use log::info;
use std::error::Error;
use std::net::SocketAddr;
use tandem_collab::{Endpoint, ServerConfig, SyncServer};

fn config_from(
    bind: Option<String>,
    name: Option<String>,
    arg: Option<String>,
) -> ServerConfig {
    let defaults = ServerConfig::default();
    ServerConfig {
        bind_addr: arg.or(bind).unwrap_or(defaults.bind_addr),
        service_name: name.unwrap_or(defaults.service_name),
        ..defaults
    }
}

/// Where peers connect to reach a document on this server.
fn join_url(local: SocketAddr) -> String {
    Endpoint::new(local.ip().to_string(), local.port()).channel_url("{docId}")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = config_from(
        std::env::var("TANDEM_BIND").ok(),
        std::env::var("TANDEM_NAME").ok(),
        std::env::args().nth(1),
    );
    info!("Starting Tandem server for '{}'...", config.service_name);

    let server = SyncServer::new(config);
    let listener = server.bind().await?;
    info!("Peers join at {}", join_url(listener.local_addr()?));

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down after {} connections, {} messages",
                stats.total_connections, stats.total_messages
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = config_from(None, None, None);
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.service_name, "tandem");
    }

    #[test]
    fn test_join_url_is_the_bound_address() {
        let local: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        assert_eq!(join_url(local), "ws://127.0.0.1:9090/doc/{docId}");
    }

    #[test]
    fn test_argument_overrides_env() {
        let config = config_from(
            Some("0.0.0.0:7000".into()),
            Some("notes.txt".into()),
            Some("127.0.0.1:7001".into()),
        );
        assert_eq!(config.bind_addr, "127.0.0.1:7001");
        assert_eq!(config.service_name, "notes.txt");

        let config = config_from(Some("0.0.0.0:7000".into()), None, None);
        assert_eq!(config.bind_addr, "0.0.0.0:7000");
    }
}
