//! Tiberius connections and bb8 pooling.

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::error::{CopyError, Result};

/// A connected SQL Server client.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Maximum TDS packet size.
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn build_config(&self) -> std::result::Result<Config, tiberius::error::Error> {
        if let Some(ado) = &self.config.connection_string {
            let mut config = Config::from_ado_string(ado)?;
            config.packet_size(TDS_MAX_PACKET_SIZE);
            return Ok(config);
        }

        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        match self.config.encrypt.to_lowercase().as_str() {
            "false" | "no" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                config.encryption(EncryptionLevel::Required);
            }
        }
        if self.config.trust_server_cert {
            config.trust_cert();
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        Ok(config)
    }
}

fn socket_error(e: std::io::Error, step: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{} failed: {}", step, e),
    }
}

/// Turn on TCP keepalive for a freshly connected socket.
fn with_keepalive(tcp: TcpStream) -> std::result::Result<TcpStream, tiberius::error::Error> {
    let socket = socket2::Socket::from(tcp.into_std().map_err(|e| socket_error(e, "detach"))?);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_INTERVAL)
        .with_interval(TCP_KEEPALIVE_INTERVAL);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Keepalive not enabled for SQL Server session: {}", e);
    }

    let std_tcp: std::net::TcpStream = socket.into();
    std_tcp
        .set_nonblocking(true)
        .map_err(|e| socket_error(e, "set_nonblocking"))?;
    TcpStream::from_std(std_tcp).map_err(|e| socket_error(e, "reattach"))
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config()?;
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| socket_error(e, "connect"))?;
        tcp.set_nodelay(true).ok();

        Client::connect(config, with_keepalive(tcp)?.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Build a pool without opening connections; the first checkout connects.
pub fn build_pool(
    config: &ConnectionConfig,
    max_size: u32,
    label: &str,
) -> Result<Pool<TiberiusConnectionManager>> {
    let manager = TiberiusConnectionManager::new(config.clone());
    // Reject malformed connection strings up front
    manager
        .build_config()
        .map_err(|e| CopyError::Config(format!("{} connection: {}", label, e)))?;

    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(POOL_CONNECTION_TIMEOUT)
        .idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .max_lifetime(Some(POOL_MAX_LIFETIME))
        .test_on_check_out(true)
        .build_unchecked(manager);

    info!(
        "Configured {} pool: {} (pool_size={})",
        label,
        config.describe(),
        max_size
    );
    Ok(pool)
}
