//! Registry of open database connections.

use crate::config::Config;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::future::Deferred;
use kvflow_storage::StorageBackend;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

enum Entry {
    Opening {
        version: Option<u32>,
        generation: u64,
        pending: Deferred<Database>,
    },
    Open(Database),
}

/// Step run on every connection the registry hands out for a name.
pub type NextStep = Rc<dyn Fn(&Database) -> CoreResult<()>>;

struct Recipe {
    config: Config,
    next_step: Option<NextStep>,
}

#[derive(Default)]
struct Connections {
    entries: HashMap<String, Entry>,
    recipes: HashMap<String, Recipe>,
    next_generation: u64,
}

/// Caches open databases by name.
///
/// The first open of a name goes to the backend; later opens share the
/// in-flight or completed connection until it is evicted. Failed opens are
/// not cached.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Rc<RefCell<Connections>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers how to open `config.name`.
    ///
    /// Later [`ConnectionRegistry::open_registered`] calls open with this
    /// configuration. `next_step` runs on every connection handed out for the
    /// name once its open has completed; an error from it rejects that
    /// caller's future only.
    pub fn register(&self, config: Config, next_step: Option<NextStep>) {
        debug!(db = %config.name, "open recipe registered");
        self.connections
            .borrow_mut()
            .recipes
            .insert(config.name.clone(), Recipe { config, next_step });
    }

    /// Forgets the recipe for `name`. Returns true if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.connections.borrow_mut().recipes.remove(name).is_some()
    }

    /// Opens `name` with its registered configuration.
    ///
    /// Rejects with `InvalidOperation` if nothing is registered for `name`.
    pub fn open_registered(&self, backend: &dyn StorageBackend, name: &str) -> Deferred<Database> {
        let config = self
            .connections
            .borrow()
            .recipes
            .get(name)
            .map(|recipe| recipe.config.clone());
        match config {
            Some(config) => self.open(backend, &config),
            None => Deferred::rejected(CoreError::invalid_operation(format!(
                "no open recipe registered for {name}"
            ))),
        }
    }

    /// Opens a database through the registry.
    ///
    /// A cached connection is reused unless `config` names a different
    /// explicit version, in which case the database is reopened. A step
    /// registered for the name runs on the returned connection.
    pub fn open(&self, backend: &dyn StorageBackend, config: &Config) -> Deferred<Database> {
        let connection = self.connect(backend, config);
        let next_step = self
            .connections
            .borrow()
            .recipes
            .get(&config.name)
            .and_then(|recipe| recipe.next_step.clone());
        match next_step {
            Some(step) => connection.map(move |db| {
                step(&db)?;
                Ok(db)
            }),
            None => connection,
        }
    }

    fn connect(&self, backend: &dyn StorageBackend, config: &Config) -> Deferred<Database> {
        {
            let connections = self.connections.borrow();
            match connections.entries.get(&config.name) {
                Some(Entry::Open(db)) if config.version.map_or(true, |v| v == db.version()) => {
                    trace!(db = %config.name, "reusing open connection");
                    return Deferred::resolved(db.clone());
                }
                Some(Entry::Opening {
                    version, pending, ..
                }) if config.version.is_none() || config.version == *version => {
                    trace!(db = %config.name, "joining in-flight open");
                    return share(pending);
                }
                _ => {}
            }
        }

        let pending = Database::open(backend, config);
        let generation = {
            let mut connections = self.connections.borrow_mut();
            connections.next_generation += 1;
            let generation = connections.next_generation;
            connections.entries.insert(
                config.name.clone(),
                Entry::Opening {
                    version: config.version,
                    generation,
                    pending: pending.clone(),
                },
            );
            generation
        };
        debug!(db = %config.name, version = ?config.version, "connection opening");

        let registry = self.clone();
        let name = config.name.clone();
        pending.inspect(move |db| registry.settle(&name, generation, Some(db.clone())));
        let registry = self.clone();
        let name = config.name.clone();
        pending.on_reject(move |_| registry.settle(&name, generation, None));

        share(&pending)
    }

    fn settle(&self, name: &str, generation: u64, db: Option<Database>) {
        let mut connections = self.connections.borrow_mut();
        let current = matches!(
            connections.entries.get(name),
            Some(Entry::Opening { generation: g, .. }) if *g == generation
        );
        if !current {
            return;
        }
        match db {
            Some(db) => {
                connections.entries.insert(name.to_string(), Entry::Open(db));
            }
            None => {
                connections.entries.remove(name);
                debug!(db = name, "connection failed, not cached");
            }
        }
    }

    /// Returns the open connection for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Database> {
        match self.connections.borrow().entries.get(name) {
            Some(Entry::Open(db)) => Some(db.clone()),
            _ => None,
        }
    }

    /// Returns true if `name` is open or being opened.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.connections.borrow().entries.contains_key(name)
    }

    /// Forgets a connection. Returns it if it was open.
    pub fn evict(&self, name: &str) -> Option<Database> {
        let entry = self.connections.borrow_mut().entries.remove(name);
        trace!(db = name, evicted = entry.is_some(), "connection evicted");
        match entry {
            Some(Entry::Open(db)) => Some(db),
            _ => None,
        }
    }

    /// Returns the number of cached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.borrow().entries.len()
    }

    /// Returns true if no connection is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if an open recipe is registered for `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.connections.borrow().recipes.contains_key(name)
    }

    /// Returns the cached names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.connections.borrow().entries.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Gives each caller its own future so resolve callbacks of one caller do
/// not leak into another's value.
fn share(pending: &Deferred<Database>) -> Deferred<Database> {
    pending.map(Ok)
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvflow_storage::{MemoryBackend, StorageError};

    fn config() -> Config {
        Config::new("app").version(1).keyed_table("kv")
    }

    #[test]
    fn concurrent_opens_share_one_connection() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();

        let first = registry.open(&backend, &config());
        let second = registry.open(&backend, &Config::new("app"));
        assert!(registry.contains("app"));
        assert!(registry.get("app").is_none());
        assert_eq!(backend.event_loop().pending(), 1);

        backend.run_until_idle();
        assert_eq!(first.value().unwrap().version(), 1);
        assert_eq!(second.value().unwrap().version(), 1);
        assert!(registry.get("app").is_some());
    }

    #[test]
    fn open_connection_is_reused() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();
        registry.open(&backend, &config());
        backend.run_until_idle();

        let again = registry.open(&backend, &config());
        assert_eq!(again.value().map(|db| db.name().to_string()), Some("app".into()));
        assert!(backend.event_loop().is_idle());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_version_reopens() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();
        registry.open(&backend, &config());
        backend.run_until_idle();

        let upgraded = registry.open(&backend, &config().version(2));
        assert!(upgraded.is_pending());
        backend.run_until_idle();
        assert_eq!(upgraded.value().unwrap().version(), 2);
        assert_eq!(registry.get("app").unwrap().version(), 2);
    }

    #[test]
    fn failed_open_is_not_cached() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();
        registry.open(&backend, &config().version(3));
        backend.run_until_idle();
        registry.evict("app");

        let stale = registry.open(&backend, &config().version(2));
        backend.run_until_idle();
        assert!(matches!(
            stale.error(),
            Some(CoreError::Storage(StorageError::VersionMismatch { .. }))
        ));
        assert!(!registry.contains("app"));
        assert!(registry.is_empty());
    }

    #[test]
    fn registered_recipe_reopens_and_runs_next_step() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        registry.register(
            config().version(2),
            Some(Rc::new(move |db: &Database| {
                log.borrow_mut().push(db.version());
                Ok(())
            })),
        );
        assert!(registry.is_registered("app"));

        let first = registry.open_registered(&backend, "app");
        backend.run_until_idle();
        assert_eq!(first.value().map(|db| db.version()), Some(2));
        assert_eq!(db_tables(&registry), vec!["kv".to_string()]);

        // A cached connection still goes through the step.
        let again = registry.open(&backend, &Config::new("app"));
        assert_eq!(again.value().map(|db| db.version()), Some(2));
        assert_eq!(*seen.borrow(), vec![2, 2]);

        assert!(registry.unregister("app"));
        registry.open(&backend, &Config::new("app"));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn failing_next_step_rejects_only_that_caller() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();
        registry.register(
            config(),
            Some(Rc::new(|_: &Database| Err(CoreError::rejected("not ready")))),
        );

        let opened = registry.open_registered(&backend, "app");
        backend.run_until_idle();
        assert_eq!(opened.error(), Some(CoreError::rejected("not ready")));
        // The connection itself opened and stays cached.
        assert!(registry.get("app").is_some());
    }

    #[test]
    fn open_registered_without_recipe_rejects() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();
        let missing = registry.open_registered(&backend, "ghost");
        assert!(matches!(missing.error(), Some(CoreError::InvalidOperation { .. })));
        assert!(backend.event_loop().is_idle());
    }

    fn db_tables(registry: &ConnectionRegistry) -> Vec<String> {
        registry.get("app").map(|db| db.table_names()).unwrap_or_default()
    }

    #[test]
    fn evict_and_names() {
        let backend = MemoryBackend::new();
        let registry = ConnectionRegistry::new();
        registry.open(&backend, &config());
        registry.open(&backend, &Config::new("other"));
        backend.run_until_idle();

        assert_eq!(registry.names(), vec!["app".to_string(), "other".to_string()]);
        assert!(registry.evict("app").is_some());
        assert!(registry.evict("app").is_none());
        assert_eq!(registry.names(), vec!["other".to_string()]);
    }
}
