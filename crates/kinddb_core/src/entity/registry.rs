//! Discriminator-based kind resolution.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::record::{Property, Record};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// Property holding the type chain of a polymorphic record, leaf first.
pub const CLASS_PROPERTY: &str = "^k";

type Loader<T> = dyn Fn(Key, Record) -> CoreResult<T> + Send + Sync;

/// Maps stored discriminators to reconstruction functions.
///
/// Several types can share one storage kind. Each record stores its type
/// chain under [`CLASS_PROPERTY`], and the registry rebuilds the leaf type
/// from it. Records without a discriminator resolve by key kind.
///
/// ```rust
/// use kinddb_core::{KindRegistry, Key, Record, CoreResult};
///
/// #[derive(Debug, PartialEq)]
/// enum Animal { Cat(String), Dog(String) }
///
/// let mut registry: KindRegistry<Animal> = KindRegistry::new();
/// registry.register_loader("Cat", |_key: Key, r: Record| -> CoreResult<Animal> {
///     Ok(Animal::Cat(r.get("name").and_then(|v| v.as_text()).unwrap_or_default().into()))
/// });
///
/// let mut record = Record::new().with_indexed("name", "tom");
/// KindRegistry::<Animal>::stamp(&mut record, &["Cat", "Animal"]);
/// let animal = registry.load(Key::new("Animal", 1), record).unwrap();
/// assert_eq!(animal, Animal::Cat("tom".into()));
/// ```
pub struct KindRegistry<T> {
    loaders: HashMap<String, Box<Loader<T>>>,
}

impl<T> Default for KindRegistry<T> {
    fn default() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }
}

impl<T> KindRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type under its kind, mapping it into `T`.
    pub fn register<E, F>(&mut self, wrap: F) -> &mut Self
    where
        E: Entity + 'static,
        F: Fn(E) -> T + Send + Sync + 'static,
    {
        self.register_loader(E::kind(), move |key, record| {
            E::from_record(key, record).map(&wrap)
        })
    }

    /// Registers a reconstruction function under a discriminator.
    pub fn register_loader<F>(&mut self, name: impl Into<String>, loader: F) -> &mut Self
    where
        F: Fn(Key, Record) -> CoreResult<T> + Send + Sync + 'static,
    {
        self.loaders.insert(name.into(), Box::new(loader));
        self
    }

    /// Looks up the reconstruction function for a discriminator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown discriminator.
    pub fn resolve_kind(&self, name: &str) -> CoreResult<&Loader<T>> {
        self.loaders
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown kind {name:?}")))
    }

    /// Rebuilds the leaf type of a stored record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown discriminator, or the
    /// loader's error.
    pub fn load(&self, key: Key, record: Record) -> CoreResult<T> {
        let name = Self::discriminator(&record)
            .unwrap_or_else(|| key.kind())
            .to_string();
        (self.resolve_kind(&name)?)(key, record)
    }

    /// Returns the leaf discriminator stored in a record.
    pub fn discriminator(record: &Record) -> Option<&str> {
        match record.get(CLASS_PROPERTY)? {
            Value::Array(chain) => chain.first().and_then(Value::as_text),
            Value::Text(name) => Some(name),
            _ => None,
        }
    }

    /// Stores a type chain, leaf first, as an indexed discriminator.
    pub fn stamp(record: &mut Record, chain: &[&str]) {
        record.set(
            CLASS_PROPERTY,
            Property::indexed(Value::array(chain.iter().copied())),
        );
    }

    /// Returns the registered discriminators.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }
}

impl<T> fmt::Debug for KindRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("KindRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Cat {
        key: Option<Key>,
        lives: i64,
    }

    impl Entity for Cat {
        fn kind() -> &'static str {
            "Cat"
        }

        fn key(&self) -> Option<&Key> {
            self.key.as_ref()
        }

        fn set_key(&mut self, key: Key) {
            self.key = Some(key);
        }

        fn to_record(&self) -> CoreResult<Record> {
            let mut record = Record::new().with_indexed("lives", self.lives);
            KindRegistry::<Pet>::stamp(&mut record, &["Cat", "Pet"]);
            Ok(record)
        }

        fn from_record(key: Key, record: Record) -> CoreResult<Self> {
            let lives = record
                .get("lives")
                .and_then(Value::as_integer)
                .ok_or_else(|| CoreError::codec("missing lives"))?;
            Ok(Self {
                key: Some(key),
                lives,
            })
        }
    }

    #[derive(Debug, PartialEq)]
    enum Pet {
        Cat(Cat),
        Rock,
    }

    fn registry() -> KindRegistry<Pet> {
        let mut registry = KindRegistry::new();
        registry
            .register::<Cat, _>(Pet::Cat)
            .register_loader("Rock", |_, _| Ok(Pet::Rock));
        registry
    }

    #[test]
    fn resolves_leaf_type_from_discriminator() {
        let cat = Cat {
            key: None,
            lives: 9,
        };
        let record = cat.to_record().unwrap();
        assert_eq!(KindRegistry::<Pet>::discriminator(&record), Some("Cat"));

        let loaded = registry().load(Key::new("Pet", 1), record).unwrap();
        assert!(matches!(loaded, Pet::Cat(Cat { lives: 9, .. })));
    }

    #[test]
    fn falls_back_to_key_kind() {
        let loaded = registry().load(Key::new("Rock", 1), Record::new()).unwrap();
        assert_eq!(loaded, Pet::Rock);
    }

    #[test]
    fn unknown_kind_is_invalid_argument() {
        let result = registry().load(Key::new("Unicorn", 1), Record::new());
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
        assert!(registry().resolve_kind("Unicorn").is_err());
    }
}
