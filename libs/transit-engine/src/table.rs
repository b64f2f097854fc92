use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;
use crate::producer::Producer;

/// Receives every table write, in the order the writes are applied.
pub trait ChangelogSink: Send {
    fn append(&mut self, key: &serde_json::Value, value: &serde_json::Value) -> Result<(), EngineError>;

    /// Flush whatever is still buffered.
    fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

impl ChangelogSink for Producer {
    fn append(&mut self, key: &serde_json::Value, value: &serde_json::Value) -> Result<(), EngineError> {
        self.publish(key, value)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        Producer::close(self)
    }
}

/// Sink for tables that are not republished.
pub struct NoChangelog;

impl ChangelogSink for NoChangelog {
    fn append(&mut self, _key: &serde_json::Value, _value: &serde_json::Value) -> Result<(), EngineError> {
        Ok(())
    }
}

pub trait TableKey: Ord + Clone + Serialize + DeserializeOwned + FromStr + Display + Send + Sync + 'static {}

impl<T> TableKey for T where T: Ord + Clone + Serialize + DeserializeOwned + FromStr + Display + Send + Sync + 'static {}

type Entries<K, V> = Arc<RwLock<BTreeMap<K, V>>>;

fn read<K, V>(entries: &Entries<K, V>) -> RwLockReadGuard<'_, BTreeMap<K, V>> {
    match entries.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("table read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write<K, V>(entries: &Entries<K, V>) -> RwLockWriteGuard<'_, BTreeMap<K, V>> {
    match entries.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("table write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Keyed last-write-wins view with a changelog.
///
/// Each `put` goes to the changelog first and is applied to the table only
/// once the changelog accepted it, so replaying the changelog always yields
/// the table's current contents. There is no delete.
pub struct MaterializedTable<K, V> {
    name: String,
    entries: Entries<K, V>,
    changelog: Box<dyn ChangelogSink>,
}

impl<K, V> MaterializedTable<K, V>
where
    K: TableKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, changelog: Box<dyn ChangelogSink>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            changelog,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&mut self, key: K, value: V) -> Result<(), EngineError> {
        let key_json = to_json(&key)?;
        let value_json = to_json(&value)?;
        self.changelog
            .append(&key_json, &value_json)
            .map_err(|e| e.with_context(format!("table '{}'", self.name)))?;
        write(&self.entries).insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        read(&self.entries).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        read(&self.entries)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn close(&mut self) -> Result<(), EngineError> {
        self.changelog.close()
    }

    /// Read-only handle sharing this table's contents.
    pub fn view(&self) -> TableHandle<K, V> {
        TableHandle {
            name: self.name.clone(),
            entries: self.entries.clone(),
        }
    }

    /// Rebuild table contents from changelog entries, oldest first.
    pub fn replay<I>(changes: I) -> Result<BTreeMap<K, V>, EngineError>
    where
        I: IntoIterator<Item = (serde_json::Value, serde_json::Value)>,
    {
        let mut table = BTreeMap::new();
        for (key, value) in changes {
            let key: K = serde_json::from_value(key)
                .map_err(|e| EngineError::Codec(format!("changelog key: {e}")))?;
            let value: V = serde_json::from_value(value)
                .map_err(|e| EngineError::Codec(format!("changelog value: {e}")))?;
            table.insert(key, value);
        }
        Ok(table)
    }
}

fn to_json<T: Serialize>(v: &T) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(v).map_err(|e| EngineError::Codec(e.to_string()))
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Type-erased read access to a table, keyed by the key's text form.
pub trait TableView: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn get_json(&self, key: &str) -> Option<serde_json::Value>;

    fn snapshot(&self) -> Vec<(serde_json::Value, serde_json::Value)>;
}

#[derive(Clone)]
pub struct TableHandle<K, V> {
    name: String,
    entries: Entries<K, V>,
}

impl<K, V> TableView for TableHandle<K, V>
where
    K: TableKey,
    V: Clone + Serialize + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        read(&self.entries).len()
    }

    fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        let key: K = key.parse().ok()?;
        let guard = read(&self.entries);
        guard.get(&key).and_then(|v| serde_json::to_value(v).ok())
    }

    fn snapshot(&self) -> Vec<(serde_json::Value, serde_json::Value)> {
        read(&self.entries)
            .iter()
            .filter_map(|(k, v)| Some((serde_json::to_value(k).ok()?, serde_json::to_value(v).ok()?)))
            .collect()
    }
}

/// Named tables of one engine, for the query API.
#[derive(Default)]
pub struct TableCatalog {
    tables: RwLock<HashMap<String, Arc<dyn TableView>>>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, table: Arc<dyn TableView>) {
        let name = table.name().to_string();
        let mut guard = match self.tables.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("table catalog write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.insert(name, table);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TableView>> {
        let guard = match self.tables.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("table catalog read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let guard = match self.tables.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("table catalog read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }
}
