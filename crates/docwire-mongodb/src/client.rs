//! Client construction, configuration and teardown

use docwire_common::{DocWireError, Result};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use std::time::Duration;

use crate::database::Database;
use crate::mongo::MongoTransport;
use crate::transport::Transport;

/// Client configuration applied on top of the connection string
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Minimum number of connections in the pool (default: driver default)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 10)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
    /// Driver-level read retries; this crate never retries on its own
    pub retry_reads: Option<bool>,
    /// Driver-level write retries; this crate never retries on its own
    pub retry_writes: Option<bool>,
    /// Declare Stable API v1 to the server
    pub stable_api: bool,
    /// Ping the server inside `connect` instead of on first use
    pub ping_on_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("docwire".to_string()),
            retry_reads: None,
            retry_writes: None,
            stable_api: true,
            ping_on_connect: false,
        }
    }
}

impl ClientConfig {
    /// Copy every configured value onto parsed driver options
    pub fn apply(&self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &self.app_name {
            options.app_name = Some(app.clone());
        }
        if let Some(retry) = self.retry_reads {
            options.retry_reads = Some(retry);
        }
        if let Some(retry) = self.retry_writes {
            options.retry_writes = Some(retry);
        }
        if self.stable_api {
            let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
            options.server_api = Some(server_api);
        }
    }
}

/// Owner of the database connection
///
/// [`Database`], [`crate::Collection`] and [`crate::Cursor`] values borrow
/// the client, so it cannot be shut down or dropped while any of them is
/// alive. Teardown happens exactly once: either in [`Client::shutdown`],
/// which consumes the client, or when the client is dropped.
pub struct Client {
    transport: Box<dyn Transport>,
}

impl Client {
    /// Connect to a MongoDB deployment with default settings
    ///
    /// # Errors
    /// Returns `DocWireError::Connection` when the URI is rejected by the
    /// driver, or when `ping_on_connect` is set and the server is unreachable.
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::connect_with_config(uri, ClientConfig::default()).await
    }

    /// Connect to a MongoDB deployment with custom configuration
    pub async fn connect_with_config(uri: &str, config: ClientConfig) -> Result<Self> {
        let transport = MongoTransport::connect(uri, &config).await?;
        let client = Self::with_transport(transport);

        if config.ping_on_connect {
            client
                .ping()
                .await
                .map_err(|e| DocWireError::Connection(format!("Ping failed: {}", e)))?;
        }

        Ok(client)
    }

    /// Wrap any transport implementation
    pub fn with_transport(transport: impl Transport) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    /// Get a database handle; performs no I/O
    pub fn database(&self, name: &str) -> Database<'_> {
        Database::new(self, name)
    }

    /// Check if the server is reachable
    pub async fn ping(&self) -> Result<()> {
        self.transport.ping().await
    }

    /// Release the connection and driver state
    pub async fn shutdown(self) {
        tracing::info!("Shutting down client");
        self.transport.shutdown().await;
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}
