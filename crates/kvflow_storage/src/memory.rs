//! In-memory storage backend.
//!
//! Operations execute against the catalog when they are issued, in
//! submission order. Their completions are queued on an [`EventLoop`] and
//! delivered only when the loop is driven, mimicking a browser-style
//! object store where results always arrive through callbacks.

use crate::backend::{
    DatabaseHandle, ScopeId, StorageBackend, TableSchema, TransactionMode, TransactionScope,
    UpgradeContext, UpgradeHandler,
};
use crate::error::{StorageError, StorageResult};
use crate::event_loop::{DeliveryOrder, EventLoop};
use crate::request::Request;
use crate::value::{Key, Value};
use parking_lot::RwLock;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// Configuration for the in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Order in which completions are delivered.
    pub delivery: DeliveryOrder,
}

impl MemoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delivery order.
    #[must_use]
    pub const fn delivery(mut self, order: DeliveryOrder) -> Self {
        self.delivery = order;
        self
    }
}

#[derive(Debug, Clone)]
struct StoredTable {
    schema: TableSchema,
    rows: BTreeMap<Key, Value>,
}

#[derive(Debug, Clone)]
struct StoredDatabase {
    version: u32,
    tables: BTreeMap<String, StoredTable>,
}

#[derive(Debug, Default)]
struct Catalog {
    databases: BTreeMap<String, StoredDatabase>,
}

/// The data that outlives database handles.
///
/// A catalog can be shared by several backends, e.g. to reopen a database
/// from a fresh backend.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<RwLock<Catalog>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the stored databases.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        self.inner.read().databases.keys().cloned().collect()
    }

    /// Stored version of a database.
    #[must_use]
    pub fn version_of(&self, db: &str) -> Option<u32> {
        self.inner.read().databases.get(db).map(|d| d.version)
    }

    /// Table names of a database.
    #[must_use]
    pub fn table_names(&self, db: &str) -> Vec<String> {
        self.inner
            .read()
            .databases
            .get(db)
            .map(|d| d.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Records of a table in key order.
    #[must_use]
    pub fn records(&self, db: &str, table: &str) -> Vec<Value> {
        self.inner
            .read()
            .databases
            .get(db)
            .and_then(|d| d.tables.get(table))
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for MemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCatalog")
            .field("databases", &self.database_names())
            .finish()
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    next: Option<String>,
    tables: HashMap<String, String>,
}

impl FaultPlan {
    fn check(&mut self, table: &str) -> StorageResult<()> {
        if let Some(message) = self.next.take() {
            return Err(StorageError::injected(message));
        }
        match self.tables.get(table) {
            Some(message) => Err(StorageError::injected(message.clone())),
            None => Ok(()),
        }
    }
}

struct Shared {
    catalog: MemoryCatalog,
    events: Rc<EventLoop>,
    faults: RefCell<FaultPlan>,
    next_scope: Cell<u64>,
}

impl Shared {
    fn open_database(
        self: &Rc<Self>,
        name: &str,
        version: Option<u32>,
        upgrade: Option<UpgradeHandler>,
    ) -> StorageResult<Rc<dyn DatabaseHandle>> {
        let (stored, tables) = {
            let catalog = self.catalog.inner.read();
            match catalog.databases.get(name) {
                Some(db) => (db.version, db.tables.clone()),
                None => (0, BTreeMap::new()),
            }
        };

        let requested = version.unwrap_or(stored).max(1);
        if requested < stored {
            return Err(StorageError::VersionMismatch { requested, stored });
        }

        if requested > stored {
            // The handler runs on a staged copy without holding the lock.
            let mut staged = MemoryUpgrade {
                old_version: stored,
                new_version: requested,
                tables,
            };
            if let Some(handler) = upgrade {
                handler(&mut staged)?;
            }
            debug!(
                db = name,
                from = stored,
                to = requested,
                tables = staged.tables.len(),
                "database upgraded"
            );
            self.catalog.inner.write().databases.insert(
                name.to_string(),
                StoredDatabase {
                    version: requested,
                    tables: staged.tables,
                },
            );
        }

        Ok(Rc::new(MemoryHandle {
            name: name.to_string(),
            version: requested,
            shared: Rc::clone(self),
        }))
    }

    fn next_scope_id(&self) -> ScopeId {
        let id = self.next_scope.get() + 1;
        self.next_scope.set(id);
        ScopeId::new(id)
    }
}

struct MemoryUpgrade {
    old_version: u32,
    new_version: u32,
    tables: BTreeMap<String, StoredTable>,
}

impl UpgradeContext for MemoryUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn create_table(&mut self, schema: TableSchema) -> StorageResult<()> {
        if self.tables.contains_key(schema.name()) {
            return Err(StorageError::TableExists {
                table: schema.name().to_string(),
            });
        }
        self.tables.insert(
            schema.name().to_string(),
            StoredTable {
                schema,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn delete_table(&mut self, name: &str) -> StorageResult<()> {
        self.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::table_not_found(name))
    }
}

/// An in-memory, event-loop driven storage backend.
///
/// # Example
///
/// ```rust
/// use kvflow_storage::{
///     upgrade_fn, MemoryBackend, StorageBackend, TableSchema, TransactionMode, Value,
/// };
///
/// let backend = MemoryBackend::new();
/// let open = backend.open(
///     "app",
///     Some(1),
///     Some(upgrade_fn(|ctx| ctx.create_table(TableSchema::keyed("kv")))),
/// );
/// backend.run_until_idle();
/// let db = open.outcome().unwrap().unwrap();
///
/// let scope = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
/// let put = scope.put("kv", Value::keyed("answer", 42));
/// assert!(!put.is_done());
/// backend.run_until_idle();
/// assert_eq!(put.outcome(), Some(Ok(Value::from("answer"))));
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Rc<Shared>,
}

impl MemoryBackend {
    /// Creates a backend with an empty catalog and default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Creates a backend with an empty catalog.
    #[must_use]
    pub fn with_config(config: MemoryConfig) -> Self {
        Self::with_catalog(MemoryCatalog::new(), config)
    }

    /// Creates a backend over an existing catalog.
    #[must_use]
    pub fn with_catalog(catalog: MemoryCatalog, config: MemoryConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                catalog,
                events: Rc::new(EventLoop::with_order(config.delivery)),
                faults: RefCell::new(FaultPlan::default()),
                next_scope: Cell::new(0),
            }),
        }
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> MemoryCatalog {
        self.shared.catalog.clone()
    }

    /// Returns the event loop completions are delivered on.
    #[must_use]
    pub fn event_loop(&self) -> Rc<EventLoop> {
        Rc::clone(&self.shared.events)
    }

    /// Delivers one queued completion.
    pub fn run_one(&self) -> bool {
        self.shared.events.run_one()
    }

    /// Delivers completions until none is queued.
    pub fn run_until_idle(&self) -> usize {
        self.shared.events.run_until_idle()
    }

    /// Makes the next issued request fail.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.shared.faults.borrow_mut().next = Some(message.into());
    }

    /// Makes every request against `table` fail until faults are cleared.
    pub fn fail_table(&self, table: impl Into<String>, message: impl Into<String>) {
        self.shared
            .faults
            .borrow_mut()
            .tables
            .insert(table.into(), message.into());
    }

    /// Disarms every injected fault.
    pub fn clear_faults(&self) {
        *self.shared.faults.borrow_mut() = FaultPlan::default();
    }

    /// Records of a table in key order.
    #[must_use]
    pub fn records(&self, db: &str, table: &str) -> Vec<Value> {
        self.shared.catalog.records(db, table)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("catalog", &self.shared.catalog)
            .field("events", &self.shared.events)
            .finish()
    }
}

impl StorageBackend for MemoryBackend {
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: Option<UpgradeHandler>,
    ) -> Request<Rc<dyn DatabaseHandle>> {
        let (request, completer) = Request::pending();
        let shared = Rc::clone(&self.shared);
        let name = name.to_string();
        self.shared.events.schedule(move || {
            let outcome = shared.open_database(&name, version, upgrade);
            completer.complete(outcome);
        });
        request
    }

    fn delete_database(&self, name: &str) -> Request<Value> {
        let (request, completer) = Request::pending();
        let catalog = self.shared.catalog.clone();
        let name = name.to_string();
        self.shared.events.schedule(move || {
            catalog.inner.write().databases.remove(&name);
            debug!(db = %name, "database deleted");
            completer.succeed(Value::Null);
        });
        request
    }
}

struct MemoryHandle {
    name: String,
    version: u32,
    shared: Rc<Shared>,
}

impl DatabaseHandle for MemoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn table_names(&self) -> Vec<String> {
        self.shared.catalog.table_names(&self.name)
    }

    fn transaction(
        &self,
        tables: &[&str],
        mode: TransactionMode,
    ) -> StorageResult<Rc<dyn TransactionScope>> {
        if tables.is_empty() {
            return Err(StorageError::EmptyScope);
        }
        {
            let catalog = self.shared.catalog.inner.read();
            let db = catalog
                .databases
                .get(&self.name)
                .ok_or_else(|| StorageError::DatabaseNotFound {
                    name: self.name.clone(),
                })?;
            if let Some(missing) = tables.iter().find(|t| !db.tables.contains_key(**t)) {
                return Err(StorageError::table_not_found(*missing));
            }
        }

        let scope = Rc::new(MemoryScope {
            id: self.shared.next_scope_id(),
            db_name: self.name.clone(),
            tables: tables.iter().map(|t| (*t).to_string()).collect(),
            mode,
            shared: Rc::clone(&self.shared),
            state: Rc::new(RefCell::new(ScopeState::default())),
        });
        trace!(scope = %scope.id, db = %self.name, ?mode, "transaction begun");
        // A scope nobody uses completes on the next turn of the loop.
        scope.schedule_commit_check();
        Ok(scope)
    }
}

#[derive(Default)]
struct ScopeState {
    outstanding: usize,
    finished: bool,
    on_complete: Vec<Box<dyn FnOnce()>>,
}

fn try_commit(state: &RefCell<ScopeState>, id: ScopeId) {
    let handlers = {
        let mut state = state.borrow_mut();
        if state.finished || state.outstanding > 0 {
            return;
        }
        state.finished = true;
        std::mem::take(&mut state.on_complete)
    };
    debug!(scope = %id, "transaction complete");
    for handler in handlers {
        handler();
    }
}

struct MemoryScope {
    id: ScopeId,
    db_name: String,
    tables: Vec<String>,
    mode: TransactionMode,
    shared: Rc<Shared>,
    state: Rc<RefCell<ScopeState>>,
}

impl MemoryScope {
    fn schedule_commit_check(&self) {
        let state = Rc::clone(&self.state);
        let id = self.id;
        self.shared
            .events
            .schedule(move || try_commit(&state, id));
    }

    fn execute(
        &self,
        table: &str,
        write: bool,
        op: impl FnOnce(&mut StoredTable) -> StorageResult<Value>,
    ) -> StorageResult<Value> {
        if self.state.borrow().finished {
            return Err(StorageError::TransactionInactive);
        }
        if !self.tables.iter().any(|t| t == table) {
            return Err(StorageError::not_in_scope(table));
        }
        if write && !self.mode.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        self.shared.faults.borrow_mut().check(table)?;

        let mut catalog = self.shared.catalog.inner.write();
        let db = catalog
            .databases
            .get_mut(&self.db_name)
            .ok_or_else(|| StorageError::DatabaseNotFound {
                name: self.db_name.clone(),
            })?;
        let stored = db
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::table_not_found(table))?;
        op(stored)
    }

    fn issue(
        &self,
        table: &str,
        write: bool,
        op: impl FnOnce(&mut StoredTable) -> StorageResult<Value>,
    ) -> Request<Value> {
        let (request, completer) = Request::pending();
        let outcome = self.execute(table, write, op);
        trace!(scope = %self.id, table, ok = outcome.is_ok(), "request issued");

        let counted = {
            let mut state = self.state.borrow_mut();
            if state.finished {
                false
            } else {
                state.outstanding += 1;
                true
            }
        };

        let state = Rc::clone(&self.state);
        let events = Rc::clone(&self.shared.events);
        let id = self.id;
        self.shared.events.schedule(move || {
            completer.complete(outcome);
            if !counted {
                return;
            }
            let idle = {
                let mut state = state.borrow_mut();
                state.outstanding -= 1;
                state.outstanding == 0
            };
            // Callbacks may have issued more requests; commit only once the
            // scope is still idle on the next turn.
            if idle {
                events.schedule(move || try_commit(&state, id));
            }
        });
        request
    }
}

impl TransactionScope for MemoryScope {
    fn id(&self) -> ScopeId {
        self.id
    }

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn is_active(&self) -> bool {
        !self.state.borrow().finished
    }

    fn put(&self, table: &str, record: Value) -> Request<Value> {
        self.issue(table, true, move |stored| {
            let key_value = record
                .get(stored.schema.key_path())
                .cloned()
                .ok_or_else(|| StorageError::MissingKey {
                    key_path: stored.schema.key_path().to_string(),
                })?;
            let key = Key::try_from(&key_value)?;
            stored.rows.insert(key, record);
            Ok(key_value)
        })
    }

    fn get(&self, table: &str, key: &Value) -> Request<Value> {
        self.issue(table, false, |stored| {
            let key = Key::try_from(key)?;
            Ok(stored.rows.get(&key).cloned().unwrap_or_default())
        })
    }

    fn clear(&self, table: &str) -> Request<Value> {
        self.issue(table, true, |stored| {
            stored.rows.clear();
            Ok(Value::Null)
        })
    }

    fn on_complete(&self, handler: Box<dyn FnOnce()>) {
        {
            let mut state = self.state.borrow_mut();
            if !state.finished {
                state.on_complete.push(handler);
                return;
            }
        }
        handler();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::upgrade_fn;
    use crate::value::VALUE_FIELD;

    fn open_db(backend: &MemoryBackend) -> Rc<dyn DatabaseHandle> {
        let request = backend.open(
            "test",
            Some(1),
            Some(upgrade_fn(|ctx| {
                ctx.create_table(TableSchema::keyed("kv"))?;
                ctx.create_table(TableSchema::new("users", "id"))
            })),
        );
        backend.run_until_idle();
        request.outcome().unwrap().unwrap()
    }

    #[test]
    fn open_creates_tables_through_upgrade() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        assert_eq!(db.name(), "test");
        assert_eq!(db.version(), 1);
        assert_eq!(db.table_names(), vec!["kv".to_string(), "users".to_string()]);
        assert_eq!(backend.catalog().version_of("test"), Some(1));
    }

    #[test]
    fn open_is_not_synchronous() {
        let backend = MemoryBackend::new();
        let request = backend.open("lazy", None, None);
        assert!(!request.is_done());
        backend.run_until_idle();
        assert!(request.is_done());
    }

    #[test]
    fn open_with_lower_version_fails() {
        let backend = MemoryBackend::new();
        let _ = open_db(&backend);

        let upgrade = backend.open("test", Some(3), None);
        backend.run_until_idle();
        assert!(upgrade.outcome().unwrap().is_ok());

        let request = backend.open("test", Some(2), None);
        backend.run_until_idle();
        assert!(matches!(
            request.outcome(),
            Some(Err(StorageError::VersionMismatch {
                requested: 2,
                stored: 3
            }))
        ));
    }

    #[test]
    fn failed_upgrade_leaves_catalog_untouched() {
        let backend = MemoryBackend::new();
        let request = backend.open(
            "broken",
            Some(1),
            Some(upgrade_fn(|_| Err(StorageError::upgrade_failed("nope")))),
        );
        backend.run_until_idle();
        assert!(request.outcome().unwrap().is_err());
        assert!(backend.catalog().database_names().is_empty());
    }

    #[test]
    fn put_then_get() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        let scope = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();

        let put = scope.put("kv", Value::keyed("a", 1));
        let get = scope.get("kv", &Value::from("a"));
        let missing = scope.get("kv", &Value::from("b"));
        backend.run_until_idle();

        assert_eq!(put.outcome(), Some(Ok(Value::from("a"))));
        let record = get.outcome().unwrap().unwrap();
        assert_eq!(record.get(VALUE_FIELD), Some(&Value::Integer(1)));
        assert_eq!(missing.outcome(), Some(Ok(Value::Null)));
    }

    #[test]
    fn put_without_key_fails() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        let scope = db.transaction(&["users"], TransactionMode::ReadWrite).unwrap();

        let put = scope.put("users", Value::map([("name", "ada")]));
        backend.run_until_idle();
        assert!(matches!(
            put.outcome(),
            Some(Err(StorageError::MissingKey { .. }))
        ));
    }

    #[test]
    fn readonly_scope_rejects_writes() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        let scope = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();

        let put = scope.put("kv", Value::keyed("a", 1));
        let clear = scope.clear("kv");
        backend.run_until_idle();
        assert_eq!(put.outcome(), Some(Err(StorageError::ReadOnly)));
        assert_eq!(clear.outcome(), Some(Err(StorageError::ReadOnly)));
    }

    #[test]
    fn table_outside_scope_fails() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        let scope = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();

        let get = scope.get("users", &Value::from(1));
        backend.run_until_idle();
        assert_eq!(
            get.outcome(),
            Some(Err(StorageError::not_in_scope("users")))
        );
    }

    #[test]
    fn transaction_on_unknown_table_fails_synchronously() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        assert!(matches!(
            db.transaction(&["nope"], TransactionMode::ReadOnly),
            Err(StorageError::TableNotFound { .. })
        ));
        assert!(matches!(
            db.transaction(&[], TransactionMode::ReadOnly),
            Err(StorageError::EmptyScope)
        ));
    }

    #[test]
    fn injected_faults() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        let scope = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();

        backend.fail_next("disk on fire");
        let first = scope.put("kv", Value::keyed("a", 1));
        let second = scope.put("kv", Value::keyed("b", 2));
        backend.run_until_idle();
        assert_eq!(
            first.outcome(),
            Some(Err(StorageError::injected("disk on fire")))
        );
        assert!(second.outcome().unwrap().is_ok());

        backend.fail_table("kv", "quota");
        let scope = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
        let get = scope.get("kv", &Value::from("b"));
        backend.run_until_idle();
        assert_eq!(get.outcome(), Some(Err(StorageError::injected("quota"))));

        backend.clear_faults();
        let scope = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
        let get = scope.get("kv", &Value::from("b"));
        backend.run_until_idle();
        assert!(get.outcome().unwrap().is_ok());
    }

    #[test]
    fn scope_completes_once_idle() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        let scope = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();

        let completed = Rc::new(Cell::new(0));
        let c = Rc::clone(&completed);
        scope.on_complete(Box::new(move || c.set(c.get() + 1)));

        scope.put("kv", Value::keyed("a", 1));
        scope.put("kv", Value::keyed("b", 2));
        assert!(scope.is_active());
        backend.run_until_idle();

        assert_eq!(completed.get(), 1);
        assert!(!scope.is_active());

        let late = scope.get("kv", &Value::from("a"));
        backend.run_until_idle();
        assert_eq!(late.outcome(), Some(Err(StorageError::TransactionInactive)));

        // Registering after completion runs immediately.
        let c = Rc::clone(&completed);
        scope.on_complete(Box::new(move || c.set(c.get() + 1)));
        assert_eq!(completed.get(), 2);
    }

    #[test]
    fn requests_issued_from_callbacks_keep_scope_alive() {
        let backend = MemoryBackend::new();
        let db = open_db(&backend);
        let scope = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();

        let follow_up = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&follow_up);
        let inner_scope = Rc::clone(&scope);
        scope.put("kv", Value::keyed("a", 1)).on_success(move |_| {
            *slot.borrow_mut() = Some(inner_scope.get("kv", &Value::from("a")));
        });
        backend.run_until_idle();

        let request = follow_up.borrow().clone().unwrap();
        assert!(request.outcome().unwrap().is_ok());
    }

    #[test]
    fn lifo_delivery_reverses_completion_order() {
        let backend = MemoryBackend::with_config(MemoryConfig::new().delivery(DeliveryOrder::Lifo));
        let db = open_db(&backend);
        let scope = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();

        let order = Rc::new(RefCell::new(Vec::new()));
        for key in ["a", "b", "c"] {
            let o = Rc::clone(&order);
            scope
                .put("kv", Value::keyed(key, 0))
                .on_success(move |k| o.borrow_mut().push(k));
        }
        backend.run_until_idle();
        assert_eq!(
            *order.borrow(),
            vec![Value::from("c"), Value::from("b"), Value::from("a")]
        );
    }

    #[test]
    fn shared_catalog_survives_backend() {
        let catalog = MemoryCatalog::new();
        {
            let backend = MemoryBackend::with_catalog(catalog.clone(), MemoryConfig::default());
            let db = open_db(&backend);
            let scope = db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap();
            scope.put("kv", Value::keyed("a", 1));
            backend.run_until_idle();
        }

        let backend = MemoryBackend::with_catalog(catalog, MemoryConfig::default());
        let request = backend.open("test", None, None);
        backend.run_until_idle();
        let db = request.outcome().unwrap().unwrap();
        assert_eq!(db.version(), 1);
        assert_eq!(backend.records("test", "kv"), vec![Value::keyed("a", 1)]);
    }

    #[test]
    fn delete_database() {
        let backend = MemoryBackend::new();
        let _ = open_db(&backend);
        let request = backend.delete_database("test");
        backend.run_until_idle();
        assert!(request.outcome().unwrap().is_ok());
        assert!(backend.catalog().database_names().is_empty());
    }
}
