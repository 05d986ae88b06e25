//! Connection management with pool configuration and health checking

use std::time::Duration;

use bson::{doc, Document as BsonDocument};
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection, Database,
};
use remora_common::{RemoraError, Result};
use tracing::info;

use crate::validation::ValidatedCollectionName;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections kept warm
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("remora".to_string()),
        }
    }
}

/// Connection manager over one client and its default database
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
}

impl Connection {
    /// Connects with default pool settings
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connects with custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string).await?;

        if let Some(min) = config.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = config.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = config.app_name {
            client_options.app_name = Some(app);
        }

        // Stable API version for forward compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = client.default_database().ok_or_else(|| {
            RemoraError::Connection(
                "no default database specified in connection string".to_string(),
            )
        })?;

        let database_name = database.name().to_string();
        info!(database = %database_name, "connection established");

        Ok(Self {
            client,
            database,
            database_name,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns an untyped collection handle, validating the name first
    pub fn collection(&self, name: &str) -> Result<Collection<BsonDocument>> {
        let validated = ValidatedCollectionName::new(name)?;
        Ok(self.database.collection(validated.as_str()))
    }

    /// Returns a typed collection handle, validating the name first
    pub fn typed_collection<T: Send + Sync>(&self, name: &str) -> Result<Collection<T>> {
        let validated = ValidatedCollectionName::new(name)?;
        Ok(self.database.collection(validated.as_str()))
    }

    /// Switches to a different database on the same client
    pub fn use_database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    /// Pings the server to check connection health
    pub async fn ping(&self) -> Result<bool> {
        match self.database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(true),
            Err(e) => Err(RemoraError::Connection(format!("ping failed: {}", e))),
        }
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let names = self.database.list_collection_names().await?;
        Ok(names)
    }

    /// Drops the current database
    pub async fn drop_database(&self) -> Result<()> {
        self.database.drop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, Some(5));
        assert_eq!(config.max_pool_size, Some(20));
        assert_eq!(config.app_name, Some("remora".to_string()));
    }

    #[test]
    fn test_invalid_connection_string_is_rejected() {
        let result = tokio_test::block_on(Connection::new("not-a-connection-string"));
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_pool_config() {
        let config = PoolConfig {
            min_pool_size: Some(2),
            max_pool_size: Some(50),
            max_idle_time: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(5)),
            server_selection_timeout: Some(Duration::from_secs(10)),
            app_name: Some("my-app".to_string()),
        };
        assert_eq!(config.min_pool_size, Some(2));
        assert_eq!(config.max_pool_size, Some(50));
    }
}
