//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlbridge::config::PoolOptions;
use sqlbridge::db::{
    BoundStatement, DataProvider, FailureLog, NativeConnection, NativeDriver, SqlxDriver,
};
use sqlbridge::error::{DbError, DbResult};
use sqlbridge::models::{ConnectionConfig, Engine, ParameterList, Record, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One statement as the scripted driver saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct Script {
    /// Statements in execution order, lifecycle calls included as plain text.
    pub executed: Vec<Executed>,
    /// Statements whose text or bound values contain this marker fail.
    pub fail_marker: Option<String>,
    /// Answers for `fetch_optional`, one per call; empty means no row.
    pub scalars: VecDeque<Value>,
    /// Answer for every `fetch_all`.
    pub rows: Vec<Record>,
    /// Answers for `execute_returning`, one per call.
    pub outputs: VecDeque<Value>,
    pub connects: usize,
    pub closes: usize,
}

impl Script {
    pub fn sql(&self) -> Vec<&str> {
        self.executed.iter().map(|e| e.sql.as_str()).collect()
    }

    fn should_fail(&self, stmt: &BoundStatement) -> bool {
        let Some(marker) = &self.fail_marker else {
            return false;
        };
        stmt.sql.contains(marker.as_str())
            || stmt
                .values
                .iter()
                .any(|v| matches!(v, Value::Text(s) if s.contains(marker.as_str())))
    }
}

/// In-memory native driver that records statements and replays scripted answers.
#[derive(Clone)]
pub struct ScriptedDriver {
    engine: Engine,
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedDriver {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn failing_on(self, marker: &str) -> Self {
        self.script.lock().unwrap().fail_marker = Some(marker.to_string());
        self
    }

    pub fn with_scalars(self, values: impl IntoIterator<Item = Value>) -> Self {
        self.script.lock().unwrap().scalars.extend(values);
        self
    }

    pub fn with_outputs(self, values: impl IntoIterator<Item = Value>) -> Self {
        self.script.lock().unwrap().outputs.extend(values);
        self
    }

    pub fn with_rows(self, rows: Vec<Record>) -> Self {
        self.script.lock().unwrap().rows = rows;
        self
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.script.lock().unwrap().executed.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .sql()
            .into_iter()
            .map(String::from)
            .collect()
    }
}

struct ScriptedConnection {
    engine: Engine,
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnection {
    fn run(&self, stmt: &BoundStatement) -> DbResult<()> {
        let mut script = self.script.lock().unwrap();
        script.executed.push(Executed {
            sql: stmt.sql.clone(),
            values: stmt.values.clone(),
        });
        if script.should_fail(stmt) {
            return Err(DbError::database(
                format!("scripted failure: {}", stmt.sql),
                Some("XX000".to_string()),
                "scripted",
            ));
        }
        Ok(())
    }

    fn lifecycle(&self, call: &str) {
        self.script.lock().unwrap().executed.push(Executed {
            sql: call.to_string(),
            values: Vec::new(),
        });
    }
}

#[async_trait]
impl NativeConnection for ScriptedConnection {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.lifecycle("BEGIN");
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.lifecycle("COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.lifecycle("ROLLBACK");
        Ok(())
    }

    async fn execute(&mut self, stmt: &BoundStatement) -> DbResult<u64> {
        self.run(stmt)?;
        Ok(1)
    }

    async fn fetch_all(&mut self, stmt: &BoundStatement) -> DbResult<Vec<Record>> {
        self.run(stmt)?;
        Ok(self.script.lock().unwrap().rows.clone())
    }

    async fn fetch_optional(&mut self, stmt: &BoundStatement) -> DbResult<Option<Record>> {
        self.run(stmt)?;
        let next = self.script.lock().unwrap().scalars.pop_front();
        Ok(next.map(|value| Record::new(vec![("value".to_string(), value)])))
    }

    async fn execute_returning(
        &mut self,
        stmt: &BoundStatement,
        output: &str,
    ) -> DbResult<Option<Value>> {
        assert_eq!(output, sqlbridge::db::OUTPUT_PARAMETER);
        self.run(stmt)?;
        Ok(self.script.lock().unwrap().outputs.pop_front())
    }

    async fn close(&mut self) -> DbResult<()> {
        self.script.lock().unwrap().closes += 1;
        Ok(())
    }
}

#[async_trait]
impl NativeDriver for ScriptedDriver {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn connect(&self) -> DbResult<Box<dyn NativeConnection>> {
        self.script.lock().unwrap().connects += 1;
        Ok(Box::new(ScriptedConnection {
            engine: self.engine,
            script: Arc::clone(&self.script),
        }))
    }
}

pub fn scripted_provider(driver: &ScriptedDriver) -> DataProvider {
    DataProvider::for_engine(
        driver.engine(),
        Arc::new(driver.clone()),
        FailureLog::with_tracing(64).unwrap(),
    )
}

/// Provider over a fresh SQLite file inside `dir`.
pub async fn sqlite_provider(dir: &tempfile::TempDir, file: &str) -> DataProvider {
    let path = dir.path().join(file);
    let config = ConnectionConfig::new(
        "test",
        format!("sqlite:{}", path.display()),
        PoolOptions::default(),
    )
    .unwrap();
    let driver = SqlxDriver::from_config(&config).await.unwrap();
    DataProvider::for_engine(
        Engine::Sqlite,
        Arc::new(driver),
        FailureLog::with_tracing(64).unwrap(),
    )
}

/// Provider for a server URL taken from `var`, or `None` to skip the test.
pub async fn server_provider(var: &str, engine: Engine) -> Option<DataProvider> {
    let url = std::env::var(var).ok()?;
    let config = ConnectionConfig::new("server", url, PoolOptions::default()).ok()?;
    let driver = SqlxDriver::from_config(&config).await.ok()?;
    Some(DataProvider::for_engine(
        engine,
        Arc::new(driver),
        FailureLog::with_tracing(64).unwrap(),
    ))
}

pub async fn exec(provider: &DataProvider, sql: &str) {
    assert!(
        provider.just_execute(sql, &ParameterList::new()).await,
        "statement failed: {}",
        sql
    );
}

pub async fn count(provider: &DataProvider, table: &str) -> i64 {
    provider
        .execute_scalar::<i64>(&format!("SELECT COUNT(*) FROM {}", table), &ParameterList::new())
        .await
        .unwrap_or(-1)
}

/// Wait until the failure log worker has handed `n` entries to its sink.
pub fn wait_delivered(log: &FailureLog, n: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while log.delivered() < n {
        assert!(Instant::now() < deadline, "failure log did not drain");
        std::thread::sleep(Duration::from_millis(5));
    }
}
