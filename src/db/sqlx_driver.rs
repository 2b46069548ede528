//! Built-in native driver for the engines sqlx supports.

use crate::db::native::{NativeConnection, NativeDriver};
use crate::db::params::{bind_mysql_value, bind_postgres_value, bind_sqlite_value};
use crate::db::pool::DbPool;
use crate::error::DbResult;
use crate::models::{ConnectionConfig, Engine};
use async_trait::async_trait;
use tracing::debug;

impl_sqlx_session!(
    mysql,
    db = sqlx::MySql,
    connection = sqlx::MySqlConnection,
    row = sqlx::mysql::MySqlRow,
    engine = Engine::MySql,
    bind = super::bind_mysql_value,
);

impl_sqlx_session!(
    postgres,
    db = sqlx::Postgres,
    connection = sqlx::PgConnection,
    row = sqlx::postgres::PgRow,
    engine = Engine::Postgres,
    bind = super::bind_postgres_value,
);

impl_sqlx_session!(
    sqlite,
    db = sqlx::Sqlite,
    connection = sqlx::SqliteConnection,
    row = sqlx::sqlite::SqliteRow,
    engine = Engine::Sqlite,
    bind = super::bind_sqlite_value,
);

/// Native driver over an sqlx pool. Each `connect` checks out one pooled
/// connection.
#[derive(Debug, Clone)]
pub struct SqlxDriver {
    pool: DbPool,
}

impl SqlxDriver {
    /// Create the pool described by `config`.
    pub async fn from_config(config: &ConnectionConfig) -> DbResult<Self> {
        Ok(Self {
            pool: DbPool::connect(config).await?,
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl NativeDriver for SqlxDriver {
    fn engine(&self) -> Engine {
        self.pool.engine()
    }

    async fn connect(&self) -> DbResult<Box<dyn NativeConnection>> {
        debug!(engine = %self.engine(), "Checking out pooled connection");
        let conn: Box<dyn NativeConnection> = impl_db_dispatch!(&self.pool, {
            MySql(pool) => Box::new(mysql::Session::open(pool.clone()).await?),
            Postgres(pool) => Box::new(postgres::Session::open(pool.clone()).await?),
            SQLite(pool) => Box::new(sqlite::Session::open(pool.clone()).await?),
        });
        Ok(conn)
    }
}
