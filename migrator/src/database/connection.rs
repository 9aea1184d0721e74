// Database connection management
//
// The host opens one connection for the provider it is configured for and lends it to the
// migration run. SQL Server goes through tiberius; PostgreSQL and MySQL through sqlx.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::info;
use sqlx::pool::PoolOptions;
use sqlx::{Database, MySql, Pool, Postgres};
use std::sync::Arc;
use std::time::Duration;
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::migration::{BatchRunner, ProviderKey};
use crate::utils::logging::mask_connection_string;

type SqlServerClient = Client<Compat<TcpStream>>;

/// One physical connection for the whole run, so session state (`SET`, temp tables) carries
/// from one batch to the next. No idle reaping and no ping that could swap it out.
fn single_session_options<DB: Database>() -> PoolOptions<DB> {
    PoolOptions::new()
        .min_connections(0)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .test_before_acquire(false)
}

/// SQL Server client shared behind a mutex; tiberius needs `&mut` for every query.
#[derive(Clone)]
pub struct SqlServerConnection {
    client: Arc<Mutex<SqlServerClient>>,
}

impl SqlServerConnection {
    pub fn client(&self) -> Arc<Mutex<SqlServerClient>> {
        Arc::clone(&self.client)
    }
}

#[derive(Clone)]
pub enum DatabaseConnection {
    SqlServer(SqlServerConnection),
    Postgres(Pool<Postgres>),
    MySql(Pool<MySql>),
}

impl DatabaseConnection {
    /// Open a connection for `provider`, giving up after `connect_timeout`.
    pub async fn connect(
        provider: ProviderKey,
        connection_string: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        info!(
            "[PHASE: database] [STEP: connect] Connecting to {} ({})",
            provider,
            mask_connection_string(connection_string)
        );

        let attempt = async {
            match provider {
                ProviderKey::SqlServer => Self::sql_server(connection_string).await,
                ProviderKey::PostgreSql => Self::postgres(connection_string).await,
                ProviderKey::MySql => Self::mysql(connection_string).await,
            }
        };

        let connection = timeout(connect_timeout, attempt)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Connection to {} timed out after {:?}",
                    provider,
                    connect_timeout
                )
            })?
            .with_context(|| format!("Unable to connect to {}", provider))?;

        info!("[PHASE: database] [STEP: connect] Connected to {}", provider);
        Ok(connection)
    }

    pub async fn postgres(connection_string: &str) -> Result<Self> {
        let pool = single_session_options::<Postgres>()
            .connect(connection_string)
            .await?;
        Ok(DatabaseConnection::Postgres(pool))
    }

    pub async fn mysql(connection_string: &str) -> Result<Self> {
        let pool = single_session_options::<MySql>()
            .connect(connection_string)
            .await?;
        Ok(DatabaseConnection::MySql(pool))
    }

    pub async fn sql_server(connection_string: &str) -> Result<Self> {
        let config = Config::from_ado_string(connection_string)?;
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        // tiberius expects a futures-io stream.
        let client = Client::connect(config, tcp.compat_write()).await?;

        Ok(DatabaseConnection::SqlServer(SqlServerConnection {
            client: Arc::new(Mutex::new(client)),
        }))
    }

    pub fn provider_key(&self) -> ProviderKey {
        match self {
            DatabaseConnection::SqlServer(_) => ProviderKey::SqlServer,
            DatabaseConnection::Postgres(_) => ProviderKey::PostgreSql,
            DatabaseConnection::MySql(_) => ProviderKey::MySql,
        }
    }

    /// Release pooled connections. The SQL Server client closes when the last handle drops.
    pub async fn close(&self) {
        match self {
            DatabaseConnection::SqlServer(_) => {}
            DatabaseConnection::Postgres(pool) => pool.close().await,
            DatabaseConnection::MySql(pool) => pool.close().await,
        }
    }
}

#[async_trait]
impl BatchRunner for DatabaseConnection {
    async fn run_batch(&self, sql: &str) -> Result<()> {
        match self {
            DatabaseConnection::SqlServer(conn) => {
                let client = conn.client();
                let mut client = client.lock().await;

                let mut stream = client
                    .simple_query(sql)
                    .await
                    .context("SQL Server rejected the batch")?;
                // Errors raised mid-batch only surface while draining result sets.
                while stream
                    .try_next()
                    .await
                    .context("SQL Server batch failed while reading results")?
                    .is_some()
                {}
            }
            DatabaseConnection::Postgres(pool) => {
                sqlx::raw_sql(sql)
                    .execute(pool)
                    .await
                    .context("PostgreSQL batch failed")?;
            }
            DatabaseConnection::MySql(pool) => {
                sqlx::raw_sql(sql)
                    .execute(pool)
                    .await
                    .context("MySQL batch failed")?;
            }
        }
        Ok(())
    }
}
