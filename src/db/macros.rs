//! Database dispatch macros for reducing code duplication.
//!
//! These macros generate engine-specific code for the sqlx-backed engines
//! while keeping each expansion linear and readable.

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbPool` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Generate a pooled native session for one sqlx engine.
///
/// The session holds an idle pooled connection until `begin`, then a
/// `Transaction<'static, _>` obtained from the pool until commit, rollback
/// or close.
macro_rules! impl_sqlx_session {
    (
        $module:ident,
        db = $db:ty,
        connection = $conn:ty,
        row = $row:ty,
        engine = $engine:expr,
        bind = $bind:path $(,)?
    ) => {
        pub(crate) mod $module {
            use crate::db::native::NativeConnection;
            use crate::db::params::BoundStatement;
            use crate::db::types::RowToRecord;
            use crate::error::{DbError, DbResult};
            use crate::models::{Engine, Record};
            use async_trait::async_trait;
            use futures_util::TryStreamExt;
            use sqlx::pool::PoolConnection;
            use sqlx::{Pool, Transaction};

            enum State {
                Idle(PoolConnection<$db>),
                InTx(Transaction<'static, $db>),
                Released,
            }

            pub(crate) struct Session {
                pool: Pool<$db>,
                state: State,
            }

            impl Session {
                pub(crate) async fn open(pool: Pool<$db>) -> DbResult<Self> {
                    let conn = pool.acquire().await?;
                    Ok(Self {
                        pool,
                        state: State::Idle(conn),
                    })
                }

                async fn conn(&mut self) -> DbResult<&mut $conn> {
                    if matches!(self.state, State::Released) {
                        self.state = State::Idle(self.pool.acquire().await?);
                    }
                    match &mut self.state {
                        State::Idle(conn) => Ok(&mut **conn),
                        State::InTx(tx) => Ok(&mut **tx),
                        State::Released => Err(DbError::internal("Connection already released")),
                    }
                }
            }

            fn bound_query(
                stmt: &BoundStatement,
            ) -> sqlx::query::Query<'_, $db, <$db as sqlx::Database>::Arguments<'_>> {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.values {
                    query = $bind(query, value);
                }
                query
            }

            #[async_trait]
            impl NativeConnection for Session {
                fn engine(&self) -> Engine {
                    $engine
                }

                async fn begin(&mut self) -> DbResult<()> {
                    match std::mem::replace(&mut self.state, State::Released) {
                        State::InTx(tx) => {
                            self.state = State::InTx(tx);
                            return Err(DbError::internal("Transaction already open"));
                        }
                        // Hand the idle connection back; the pool gives out a 'static transaction
                        State::Idle(conn) => drop(conn),
                        State::Released => {}
                    }
                    let tx = self.pool.begin().await?;
                    self.state = State::InTx(tx);
                    Ok(())
                }

                async fn commit(&mut self) -> DbResult<()> {
                    match std::mem::replace(&mut self.state, State::Released) {
                        State::InTx(tx) => Ok(tx.commit().await?),
                        other => {
                            self.state = other;
                            Err(DbError::internal("No open transaction to commit"))
                        }
                    }
                }

                async fn rollback(&mut self) -> DbResult<()> {
                    match std::mem::replace(&mut self.state, State::Released) {
                        State::InTx(tx) => Ok(tx.rollback().await?),
                        other => {
                            self.state = other;
                            Err(DbError::internal("No open transaction to roll back"))
                        }
                    }
                }

                async fn execute(&mut self, stmt: &BoundStatement) -> DbResult<u64> {
                    let conn = self.conn().await?;
                    let result = if stmt.is_parameterized() {
                        bound_query(stmt).execute(conn).await?
                    } else {
                        // Unprepared execution for statements without parameters
                        sqlx::Executor::execute(conn, stmt.sql.as_str()).await?
                    };
                    Ok(result.rows_affected())
                }

                async fn fetch_all(&mut self, stmt: &BoundStatement) -> DbResult<Vec<Record>> {
                    let conn = self.conn().await?;
                    let rows: Vec<$row> = bound_query(stmt).fetch(conn).try_collect().await?;
                    rows.iter().map(|row| row.to_record()).collect()
                }

                async fn fetch_optional(&mut self, stmt: &BoundStatement) -> DbResult<Option<Record>> {
                    let conn = self.conn().await?;
                    let row = bound_query(stmt).fetch_optional(conn).await?;
                    row.map(|row| row.to_record()).transpose()
                }

                async fn close(&mut self) -> DbResult<()> {
                    match std::mem::replace(&mut self.state, State::Released) {
                        State::InTx(tx) => {
                            tracing::warn!(engine = %$engine, "Closing connection with an open transaction, rolling back");
                            tx.rollback().await?;
                        }
                        State::Idle(conn) => drop(conn),
                        State::Released => {}
                    }
                    Ok(())
                }
            }
        }
    };
}
