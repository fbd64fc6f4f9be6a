//! The process-wide database handle.
//!
//! A [`Connection`] is a cheap, clonable reference to one driver handle.
//! Every statement goes through a single gate so that transaction control
//! issued on the handle is never interleaved between callers.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::thread::{self, ThreadId};

use once_cell::sync::Lazy;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tokio::task::{self, Id as TaskId};

use crate::builders::Builder;
use crate::config::ConnectionConfig;
use crate::drivers::TokioPostgresDriver;
use crate::error::{QuarryError, Result};
use crate::grammar::Grammar;
use crate::traits::{DatabaseDriver, ExecuteOutcome, QueryCompiler};
use crate::types::{QueryResult, SqlValue};

static GLOBAL: Lazy<Connection> = Lazy::new(Connection::new);

/// Who holds an open [`Transaction`]: a spawned task, or the root future a
/// runtime is blocking on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Task(TaskId),
    Thread(ThreadId),
}

impl Holder {
    fn current() -> Self {
        match task::try_id() {
            Some(id) => Holder::Task(id),
            None => Holder::Thread(thread::current().id()),
        }
    }
}

struct Shared {
    driver: OnceCell<Arc<dyn DatabaseDriver>>,
    gate: Arc<Mutex<()>>,
    holder: StdMutex<Option<Holder>>,
    compiler: Arc<dyn QueryCompiler>,
}

impl Shared {
    fn set_holder(&self, holder: Option<Holder>) {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = holder;
    }

    fn held_by_current(&self) -> bool {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) == Some(Holder::current())
    }
}

/// Handle to the single backing store.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// A disconnected handle using the default [`Grammar`].
    pub fn new() -> Self {
        Self::build(OnceCell::new(), Arc::new(Grammar::new()))
    }

    /// Create a connection over a custom driver.
    /// Useful for testing or using alternative database drivers.
    pub fn with_driver(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self::build(OnceCell::new_with(Some(driver)), Arc::new(Grammar::new()))
    }

    /// Same as [`Connection::with_driver`] with a different SQL compiler.
    pub fn with_driver_and_compiler(
        driver: Arc<dyn DatabaseDriver>,
        compiler: Arc<dyn QueryCompiler>,
    ) -> Self {
        Self::build(OnceCell::new_with(Some(driver)), compiler)
    }

    fn build(driver: OnceCell<Arc<dyn DatabaseDriver>>, compiler: Arc<dyn QueryCompiler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                driver,
                gate: Arc::new(Mutex::new(())),
                holder: StdMutex::new(None),
                compiler,
            }),
        }
    }

    /// The process-wide connection models use unless one is injected.
    pub fn global() -> Connection {
        GLOBAL.clone()
    }

    /// Connect to PostgreSQL. Does nothing if this handle is already connected.
    ///
    /// # Example
    /// ```ignore
    /// let config = ConnectionConfig::load()?;
    /// Connection::global().connect(&config).await?;
    /// ```
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        config.validate()?;
        self.shared
            .driver
            .get_or_try_init(|| async {
                let driver = TokioPostgresDriver::connect(config).await?;
                tracing::info!(
                    host = %config.host,
                    database = %config.database,
                    "connected to database"
                );
                Ok::<_, QuarryError>(Arc::new(driver) as Arc<dyn DatabaseDriver>)
            })
            .await?;
        Ok(())
    }

    /// Attach a driver to a handle that is not yet connected.
    /// Returns false if a driver was already present.
    pub fn attach_driver(&self, driver: Arc<dyn DatabaseDriver>) -> bool {
        self.shared.driver.set(driver).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.driver.initialized()
    }

    pub fn compiler(&self) -> Arc<dyn QueryCompiler> {
        Arc::clone(&self.shared.compiler)
    }

    /// Start a fluent query against `table`.
    pub fn table(&self, table: &str) -> Builder {
        let mut builder = self.builder();
        builder.from(table);
        builder
    }

    /// A builder with no table set.
    pub fn builder(&self) -> Builder {
        Builder::new(self.clone())
    }

    fn driver(&self) -> Result<Arc<dyn DatabaseDriver>> {
        self.shared
            .driver
            .get()
            .cloned()
            .ok_or(QuarryError::NoConnection)
    }

    /// Take the gate. Fails instead of waiting forever when the calling task
    /// already holds it through an open [`Transaction`].
    async fn enter(&self) -> Result<OwnedMutexGuard<()>> {
        if self.shared.held_by_current() {
            return Err(QuarryError::TransactionActive);
        }
        Ok(Arc::clone(&self.shared.gate).lock_owned().await)
    }

    /// Run a statement that returns rows. No transaction is opened.
    pub async fn select(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let driver = self.driver()?;
        let _gate = self.enter().await?;
        tracing::debug!(sql, ?params, "select");
        let raw = driver
            .query(sql, params)
            .await
            .map_err(|e| QuarryError::execution(e, sql, params))?;
        Ok(QueryResult::from_raw(raw))
    }

    /// Run an INSERT inside its own transaction. Returns the generated
    /// identifier when the driver reports one, otherwise the affected row count.
    pub async fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        let outcome = self.mutate(sql, params, true).await?;
        Ok(outcome
            .last_insert_id
            .unwrap_or(outcome.rows_affected as i64))
    }

    /// Run an UPDATE inside its own transaction. Returns the affected row count.
    pub async fn update(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        Ok(self.mutate(sql, params, false).await?.rows_affected)
    }

    /// Run a DELETE inside its own transaction. Returns the affected row count.
    pub async fn delete(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        Ok(self.mutate(sql, params, false).await?.rows_affected)
    }

    async fn mutate(&self, sql: &str, params: &[SqlValue], insert: bool) -> Result<ExecuteOutcome> {
        let transaction = self.begin().await?;
        let outcome = if insert {
            transaction.insert(sql, params).await
        } else {
            transaction.execute(sql, params).await
        };
        match outcome {
            Ok(outcome) => {
                transaction
                    .commit()
                    .await
                    .map_err(|e| QuarryError::execution(e, sql, params))?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = transaction.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Open a transaction. The returned token holds the handle exclusively
    /// until it is committed, rolled back or dropped. Statements issued on the
    /// connection by the same task meanwhile fail with
    /// [`QuarryError::TransactionActive`]; other tasks wait.
    pub async fn begin(&self) -> Result<Transaction> {
        let driver = self.driver()?;
        let guard = self.enter().await?;
        tracing::debug!("begin transaction");
        driver.begin().await?;
        self.shared.set_holder(Some(Holder::current()));
        Ok(Transaction {
            driver,
            shared: Arc::clone(&self.shared),
            guard: Some(guard),
            state: TransactionState::Active,
        })
    }

    /// `CALL name(?, ...)` with positional parameters.
    pub async fn call_procedure(&self, name: &str, params: &[SqlValue]) -> Result<bool> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid {
            return Err(QuarryError::InvalidArgument(format!(
                "Illegal procedure name `{}`",
                name
            )));
        }
        let sql = if params.is_empty() {
            format!("CALL {}()", name)
        } else {
            format!("CALL {}({})", name, vec!["?"; params.len()].join(", "))
        };

        let driver = self.driver()?;
        let _gate = self.enter().await?;
        tracing::debug!(sql = %sql, ?params, "call procedure");
        driver
            .execute(&sql, params)
            .await
            .map_err(|e| QuarryError::execution(e, &sql, params))?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// An open transaction. Consumed by [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback); dropping it while active rolls back
/// in the background.
pub struct Transaction {
    driver: Arc<dyn DatabaseDriver>,
    shared: Arc<Shared>,
    guard: Option<OwnedMutexGuard<()>>,
    state: TransactionState,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .finish()
    }
}

impl Transaction {
    pub async fn select(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        tracing::debug!(sql, ?params, "select in transaction");
        let raw = self
            .driver
            .query(sql, params)
            .await
            .map_err(|e| QuarryError::execution(e, sql, params))?;
        Ok(QueryResult::from_raw(raw))
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        tracing::debug!(sql, ?params, "execute");
        self.driver
            .execute(sql, params)
            .await
            .map_err(|e| QuarryError::execution(e, sql, params))
    }

    pub async fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        tracing::debug!(sql, ?params, "insert");
        self.driver
            .insert(sql, params)
            .await
            .map_err(|e| QuarryError::execution(e, sql, params))
    }

    pub async fn commit(mut self) -> Result<()> {
        self.driver.commit().await?;
        self.state = TransactionState::Committed;
        tracing::debug!("commit transaction");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        tracing::warn!("rolling back transaction");
        // Marked first: a failed ROLLBACK must not be retried from Drop.
        self.state = TransactionState::RolledBack;
        self.driver.rollback().await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Cleared before the guard goes: the rollback below may still hold
        // the gate, but the owning task is free to wait for it.
        self.shared.set_holder(None);
        if self.state != TransactionState::Active {
            return;
        }
        tracing::warn!("transaction dropped without commit or rollback");
        let guard = self.guard.take();
        let driver = Arc::clone(&self.driver);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _guard = guard;
                if let Err(e) = driver.rollback().await {
                    tracing::error!(error = %e, "background rollback failed");
                }
            });
        }
    }
}
