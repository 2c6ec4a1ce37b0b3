//! Sample entities and an adapter harness.
//!
//! [`Harness`] wires an [`InMemoryService`] behind a [`RemoteAdapter`],
//! optionally wrapped in a [`CachingAdapter`], and hands out sessions over
//! it. Tests keep the harness to inspect the store and inject faults.

use kinddb_cache::{CachingAdapter, InMemoryCache};
use kinddb_core::{
    Adapter, CacheConfig, Config, CoreError, CoreResult, Entity, Key, Record, Session, Value,
};
use kinddb_remote::{InMemoryService, RemoteAdapter};
use std::sync::Arc;

/// Project id used by every harness.
pub const TEST_PROJECT: &str = "kinddb-test";

/// A person, optionally owned by an organization key.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    /// Storage key, `None` until first stored.
    pub key: Option<Key>,
    /// Display name. Indexed.
    pub name: String,
    /// Age in years. Indexed.
    pub age: i64,
    /// Free text. Not indexed.
    pub bio: String,
}

impl Person {
    /// Creates an unsaved person.
    pub fn new(name: impl Into<String>, age: i64) -> Self {
        Self {
            key: None,
            name: name.into(),
            age,
            bio: String::new(),
        }
    }

    /// Creates an unsaved person under `parent`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `parent` is partial.
    pub fn under(parent: &Key, name: impl Into<String>, age: i64) -> CoreResult<Self> {
        let mut person = Self::new(name, age);
        person.key = Some(parent.partial_child(Self::kind())?);
        Ok(person)
    }
}

impl Entity for Person {
    fn kind() -> &'static str {
        "Person"
    }

    fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn to_record(&self) -> CoreResult<Record> {
        Ok(Record::new()
            .with_indexed("name", self.name.as_str())
            .with_indexed("age", self.age)
            .with_unindexed("bio", self.bio.as_str()))
    }

    fn from_record(key: Key, record: Record) -> CoreResult<Self> {
        let name = record
            .get("name")
            .and_then(Value::as_text)
            .ok_or_else(|| CoreError::codec("person without a name"))?;
        let age = record.get("age").and_then(Value::as_integer).unwrap_or_default();
        let bio = record.get("bio").and_then(Value::as_text).unwrap_or_default();
        Ok(Self {
            key: Some(key),
            name: name.to_string(),
            age,
            bio: bio.to_string(),
        })
    }

    fn pre_put(&mut self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_argument("person name must not be empty"));
        }
        Ok(())
    }
}

/// A named account holding a balance in cents.
#[derive(Debug, Clone, PartialEq)]
pub struct BankAccount {
    /// Storage key.
    pub key: Option<Key>,
    /// Account owner. Indexed.
    pub owner: String,
    /// Balance in cents.
    pub balance: i64,
}

impl BankAccount {
    /// Creates an account with a name key.
    pub fn new(owner: &str, balance: i64) -> Self {
        Self {
            key: Some(Key::new(Self::kind(), owner)),
            owner: owner.to_string(),
            balance,
        }
    }

    /// Returns the account key for `owner`.
    pub fn key_for(owner: &str) -> Key {
        Key::new(Self::kind(), owner)
    }
}

impl Entity for BankAccount {
    fn kind() -> &'static str {
        "BankAccount"
    }

    fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    fn to_record(&self) -> CoreResult<Record> {
        Ok(Record::new()
            .with_indexed("owner", self.owner.as_str())
            .with_unindexed("balance", self.balance))
    }

    fn from_record(key: Key, record: Record) -> CoreResult<Self> {
        let owner = record.get("owner").and_then(Value::as_text).unwrap_or_default();
        let balance = record
            .get("balance")
            .and_then(Value::as_integer)
            .ok_or_else(|| CoreError::codec("account without a balance"))?;
        Ok(Self {
            key: Some(key),
            owner: owner.to_string(),
            balance,
        })
    }
}

/// An emulated backend with adapters and sessions over it.
pub struct Harness {
    store: Arc<InMemoryService>,
    cache: Option<Arc<InMemoryCache>>,
    adapter: Arc<dyn Adapter>,
}

impl Harness {
    /// Creates a harness with a bare remote adapter.
    pub fn remote() -> Self {
        let store = Arc::new(InMemoryService::new());
        let adapter = RemoteAdapter::new(Arc::clone(&store), TEST_PROJECT);
        Self {
            store,
            cache: None,
            adapter: Arc::new(adapter),
        }
    }

    /// Creates a harness with a caching adapter over the remote adapter.
    pub fn cached() -> Self {
        Self::cached_with(CacheConfig::default())
    }

    /// Creates a caching harness with custom cache settings.
    pub fn cached_with(config: CacheConfig) -> Self {
        let store = Arc::new(InMemoryService::new());
        let cache = Arc::new(InMemoryCache::new());
        let adapter = CachingAdapter::new(
            RemoteAdapter::new(Arc::clone(&store), TEST_PROJECT),
            Arc::clone(&cache),
            config,
        );
        Self {
            store,
            cache: Some(cache),
            adapter: Arc::new(adapter),
        }
    }

    /// Returns the emulated store.
    pub fn store(&self) -> &Arc<InMemoryService> {
        &self.store
    }

    /// Returns the cache, if this harness has one.
    pub fn cache(&self) -> Option<&Arc<InMemoryCache>> {
        self.cache.as_ref()
    }

    /// Returns the outermost adapter.
    pub fn adapter(&self) -> Arc<dyn Adapter> {
        Arc::clone(&self.adapter)
    }

    /// Creates a session with the default test configuration.
    pub fn session(&self) -> Session {
        self.session_with(Config::new().project(TEST_PROJECT))
    }

    /// Creates a session with `config`.
    pub fn session_with(&self, config: Config) -> Session {
        Session::new(self.adapter(), config)
    }

    /// Stores `count` people named `person-001`, `person-002`, ... with
    /// ages `1..=count`, and returns their keys in that order.
    ///
    /// # Errors
    ///
    /// Returns any adapter error.
    pub fn seed_people(&self, count: usize) -> CoreResult<Vec<Key>> {
        let mut people: Vec<Person> = (1..=count)
            .map(|i| Person::new(format!("person-{i:03}"), i as i64))
            .collect();
        self.session().put_multi(&mut people)
    }

    /// Stores one account per `(owner, balance)` pair.
    ///
    /// # Errors
    ///
    /// Returns any adapter error.
    pub fn seed_accounts(&self, accounts: &[(&str, i64)]) -> CoreResult<Vec<Key>> {
        let mut accounts: Vec<BankAccount> = accounts
            .iter()
            .map(|(owner, balance)| BankAccount::new(owner, *balance))
            .collect();
        self.session().put_multi(&mut accounts)
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("adapter", &self.adapter.name())
            .field("records", &self.store.len())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
