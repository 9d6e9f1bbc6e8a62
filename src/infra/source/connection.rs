//! In-memory database connections, the pooled wrapper that exposes only
//! the operations a function may perform, and the transaction duties.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::{
    Administration, AdministrationContext, AdministrationDeclaration, Escalation, FunctionContext,
    ManagedObjectSource, ManagedObjectUser, RecycleManagedObjectParameter, SourceContext,
    SourceError, SourceMetaData, SourceSpecification,
};

/// Operations on a database connection.
pub trait Connection: Send + Sync {
    /// Run a statement, returning the number of statements run so far on
    /// this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn execute(&self, statement: &str) -> Result<u64, SourceError>;

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if one is already open or the connection is closed.
    fn begin(&self) -> Result<(), SourceError>;

    /// Commit the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open.
    fn commit(&self) -> Result<(), SourceError>;

    /// Discard the open transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open.
    fn rollback(&self) -> Result<(), SourceError>;

    /// Whether a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if closing is not permitted.
    fn close(&self) -> Result<(), SourceError>;
}

#[derive(Debug, Default)]
struct ConnectionState {
    in_transaction: bool,
    pending: Vec<String>,
    committed: Vec<String>,
    executed: u64,
    closed: bool,
}

/// A connection that keeps committed statements in memory.
#[derive(Debug)]
pub struct InMemoryConnection {
    id: u64,
    url: String,
    state: Mutex<ConnectionState>,
}

impl InMemoryConnection {
    /// Open connection `id` to `url`.
    pub fn new(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// URL the connection was opened against.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Statements committed so far.
    #[must_use]
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Connection for InMemoryConnection {
    fn execute(&self, statement: &str) -> Result<u64, SourceError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SourceError::Failed(format!("connection {} is closed", self.id)));
        }
        if state.in_transaction {
            state.pending.push(statement.to_string());
        } else {
            state.committed.push(statement.to_string());
        }
        state.executed += 1;
        Ok(state.executed)
    }

    fn begin(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SourceError::Failed(format!("connection {} is closed", self.id)));
        }
        if state.in_transaction {
            return Err(SourceError::Failed("transaction already open".to_string()));
        }
        state.in_transaction = true;
        Ok(())
    }

    fn commit(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        if !state.in_transaction {
            return Err(SourceError::Failed("no open transaction".to_string()));
        }
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        state.in_transaction = false;
        Ok(())
    }

    fn rollback(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        if !state.in_transaction {
            return Err(SourceError::Failed("no open transaction".to_string()));
        }
        state.pending.clear();
        state.in_transaction = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    fn close(&self) -> Result<(), SourceError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// A pooled connection as functions see it.
///
/// Closing is reserved for the pool, so [`Connection::close`] fails with
/// [`SourceError::UnsupportedOperation`].
#[derive(Debug, Clone)]
pub struct PooledConnection {
    inner: Arc<InMemoryConnection>,
}

impl PooledConnection {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: Arc<InMemoryConnection>) -> Self {
        Self { inner }
    }

    /// Identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// Statements committed on the underlying connection.
    #[must_use]
    pub fn committed(&self) -> Vec<String> {
        self.inner.committed()
    }
}

impl Connection for PooledConnection {
    fn execute(&self, statement: &str) -> Result<u64, SourceError> {
        self.inner.execute(statement)
    }

    fn begin(&self) -> Result<(), SourceError> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<(), SourceError> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<(), SourceError> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn close(&self) -> Result<(), SourceError> {
        Err(SourceError::UnsupportedOperation("close"))
    }
}

/// Property naming the database URL.
pub const URL_PROPERTY: &str = "url";

/// Sources [`PooledConnection`]s to an in-memory database.
///
/// Requires the `url` property. The registered recycle function rolls back
/// any transaction a function left open, so the connection can go back to
/// its pool clean.
#[derive(Debug, Default)]
pub struct ConnectionSource {
    url: String,
    opened: Arc<AtomicU64>,
}

impl ConnectionSource {
    /// Create an uninitialised source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared count of connections opened by this source.
    #[must_use]
    pub fn open_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.opened)
    }

    fn recycle(context: &mut FunctionContext) -> Result<(), Escalation> {
        let Some(recycle) = context.parameter::<RecycleManagedObjectParameter>() else {
            return Err(Escalation::new("recycle", "missing recycle parameter"));
        };
        let Some(connection) = recycle.object::<PooledConnection>() else {
            return Err(Escalation::new(
                "recycle",
                format!("`{}` is not a pooled connection", recycle.object_name()),
            ));
        };
        if connection.in_transaction() {
            warn!(connection = connection.id(), "rolling back transaction left open");
            connection
                .rollback()
                .map_err(|e| Escalation::new("recycle", e.to_string()))?;
        }
        debug!(connection = connection.id(), "connection recycled");
        Ok(())
    }
}

impl ManagedObjectSource for ConnectionSource {
    fn specification(&self) -> SourceSpecification {
        SourceSpecification::new().with_property(URL_PROPERTY)
    }

    fn init(&mut self, context: &mut SourceContext) -> Result<SourceMetaData, SourceError> {
        let url = context.property(URL_PROPERTY)?;
        if url.is_empty() {
            return Err(SourceError::InvalidProperty {
                name: URL_PROPERTY.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.url = url.to_string();
        context.set_recycle_fn(Self::recycle);
        Ok(SourceMetaData::new("connection"))
    }

    fn source_managed_object(&self, user: ManagedObjectUser) {
        let id = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection = id, url = %self.url, "opening connection");
        let connection = Arc::new(InMemoryConnection::new(id, self.url.clone()));
        user.set_managed_object(PooledConnection::new(connection));
    }
}

#[derive(Debug, Clone, Copy)]
enum TransactionStep {
    Begin,
    Commit,
}

#[derive(Debug)]
struct TransactionDuty(TransactionStep);

impl Administration for TransactionDuty {
    fn administer(&self, context: &mut AdministrationContext) -> Result<(), Escalation> {
        for index in 0..context.object_count() {
            let Some(connection) = context.object::<PooledConnection>(index) else {
                return Err(Escalation::administration(
                    "transaction",
                    format!("object {index} of `{}` is not a connection", context.function_name()),
                ));
            };
            let result = match self.0 {
                TransactionStep::Begin => connection.begin(),
                TransactionStep::Commit => connection.commit(),
            };
            result.map_err(|e| Escalation::administration("transaction", e.to_string()))?;
        }
        Ok(())
    }
}

/// Pre-administration opening a transaction on each named connection.
pub fn begin_transaction<I, S>(objects: I) -> AdministrationDeclaration
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    AdministrationDeclaration::new(
        "begin_transaction",
        Arc::new(TransactionDuty(TransactionStep::Begin)),
        objects,
    )
}

/// Post-administration committing the transaction on each named connection.
pub fn commit_transaction<I, S>(objects: I) -> AdministrationDeclaration
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    AdministrationDeclaration::new(
        "commit_transaction",
        Arc::new(TransactionDuty(TransactionStep::Commit)),
        objects,
    )
}
