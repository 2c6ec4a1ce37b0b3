//! Generic storage records.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored property: a value plus its indexing flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// The property value. Arrays are repeated properties.
    pub value: Value,
    /// Whether the property should be indexed.
    pub indexed: bool,
}

impl Property {
    /// Creates an indexed property.
    pub fn indexed(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            indexed: true,
        }
    }

    /// Creates an unindexed property.
    pub fn unindexed(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            indexed: false,
        }
    }

    /// Returns true if this is a repeated property.
    pub fn is_repeated(&self) -> bool {
        matches!(self.value, Value::Array(_))
    }
}

/// The generic storage unit exchanged between the entity mapper and adapters.
///
/// A record is a transient DTO: built immediately before a put and consumed
/// immediately after a get. It maps property names to tagged values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    properties: BTreeMap<String, Property>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an indexed property, returning the record for chaining.
    #[must_use]
    pub fn with_indexed(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, Property::indexed(value));
        self
    }

    /// Sets an unindexed property, returning the record for chaining.
    #[must_use]
    pub fn with_unindexed(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, Property::unindexed(value));
        self
    }

    /// Sets a property.
    pub fn set(&mut self, name: impl Into<String>, property: Property) {
        self.properties.insert(name.into(), property);
    }

    /// Removes a property.
    pub fn remove(&mut self, name: &str) -> Option<Property> {
        self.properties.remove(name)
    }

    /// Returns a property.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Returns a property value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).map(|p| &p.value)
    }

    /// Returns true if the property is present.
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Iterates over properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the names of the indexed properties.
    pub fn indexed_names(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|(_, p)| p.indexed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns a record containing only the named properties.
    #[must_use]
    pub fn project(&self, names: &[String]) -> Self {
        let properties = names
            .iter()
            .filter_map(|name| {
                self.properties
                    .get(name)
                    .map(|p| (name.clone(), p.clone()))
            })
            .collect();
        Self { properties }
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if the record has no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl FromIterator<(String, Property)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Property)>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}
