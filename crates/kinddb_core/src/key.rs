//! Datastore keys.

use crate::error::{CoreError, CoreResult};
use crate::namespace;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Maximum byte length of a key name.
pub const MAX_NAME_LENGTH: usize = 1500;

/// The id-or-name part of a key path element.
///
/// Numeric ids sort before names, matching the store's key ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// Backend-assigned (or caller-chosen) numeric id.
    Id(i64),
    /// Caller-chosen string name.
    Name(String),
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// One `(kind, id-or-name)` step of a key's ancestor path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    /// The kind of this element.
    pub kind: String,
    /// The id or name, `None` only for the last element of a partial key.
    pub id: Option<KeyId>,
}

impl PathElement {
    /// Creates a path element.
    pub fn new(kind: impl Into<String>, id: impl Into<Option<KeyId>>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// An immutable identifier for a stored record.
///
/// A key is a value object: two keys are equal when their kind, id or
/// name, parent chain and namespace are equal. The parent chain is
/// shared between clones and never mutated.
///
/// A key with neither id nor name is *partial*. Partial keys belong to
/// records that have not been stored yet and cannot be used as parents.
///
/// ```rust
/// use kinddb_core::Key;
///
/// let org = Key::new("Organization", 1);
/// let person = org.child("Person", "alice").unwrap();
/// assert_eq!(person.parent(), Some(&org));
/// assert!(Key::partial("Person").is_partial());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "KeyRepr", try_from = "KeyRepr")]
pub struct Key(Arc<KeyInner>);

#[derive(PartialEq, Eq, Hash)]
struct KeyInner {
    kind: String,
    id: Option<KeyId>,
    parent: Option<Key>,
    namespace: Option<String>,
}

impl Key {
    /// Creates a complete root key in the current namespace.
    pub fn new(kind: impl Into<String>, id: impl Into<KeyId>) -> Self {
        Self::build(kind.into(), Some(id.into()), None, namespace::current())
    }

    /// Creates a partial root key in the current namespace.
    pub fn partial(kind: impl Into<String>) -> Self {
        Self::build(kind.into(), None, None, namespace::current())
    }

    /// Reconstructs a key from its components.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the parent is partial or lives in a
    /// different namespace.
    pub fn from_parts(
        kind: impl Into<String>,
        id: Option<KeyId>,
        parent: Option<Key>,
        namespace: Option<String>,
    ) -> CoreResult<Self> {
        if let Some(parent) = &parent {
            if parent.is_partial() {
                return Err(CoreError::invalid_argument(format!(
                    "cannot use partial key {parent} as a parent"
                )));
            }
            if parent.namespace() != namespace.as_deref() {
                return Err(CoreError::invalid_argument(format!(
                    "parent {parent} is not in namespace {namespace:?}"
                )));
            }
        }
        Ok(Self::build(kind.into(), id, parent, namespace))
    }

    /// Builds a key from a full ancestor path.
    ///
    /// Every element except the last must carry an id or name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty path or a partial ancestor.
    pub fn from_path(path: &[PathElement], namespace: Option<String>) -> CoreResult<Self> {
        let mut key: Option<Key> = None;
        for element in path {
            key = Some(Self::from_parts(
                element.kind.clone(),
                element.id.clone(),
                key,
                namespace.clone(),
            )?);
        }
        key.ok_or_else(|| CoreError::invalid_argument("key path is empty"))
    }

    fn build(
        kind: String,
        id: Option<KeyId>,
        parent: Option<Key>,
        namespace: Option<String>,
    ) -> Self {
        Self(Arc::new(KeyInner {
            kind,
            id,
            parent,
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }))
    }

    /// Creates a complete child of this key.
    ///
    /// The child inherits this key's namespace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if this key is partial.
    pub fn child(&self, kind: impl Into<String>, id: impl Into<KeyId>) -> CoreResult<Self> {
        Self::from_parts(kind, Some(id.into()), Some(self.clone()), self.namespace_owned())
    }

    /// Creates a partial child of this key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if this key is partial.
    pub fn partial_child(&self, kind: impl Into<String>) -> CoreResult<Self> {
        Self::from_parts(kind, None, Some(self.clone()), self.namespace_owned())
    }

    /// Returns a copy of this key, and its whole parent chain, moved to `namespace`.
    #[must_use]
    pub fn with_namespace(&self, namespace: Option<String>) -> Self {
        let parent = self.parent().map(|p| p.with_namespace(namespace.clone()));
        Self::build(self.0.kind.clone(), self.0.id.clone(), parent, namespace)
    }

    /// Returns this key completed with a backend-assigned id.
    ///
    /// Keys that already carry an id or name are returned unchanged.
    #[must_use]
    pub fn with_completed_id(&self, id: i64) -> Self {
        if self.is_complete() {
            return self.clone();
        }
        Self::build(
            self.0.kind.clone(),
            Some(KeyId::Id(id)),
            self.0.parent.clone(),
            self.namespace_owned(),
        )
    }

    /// Returns the kind.
    pub fn kind(&self) -> &str {
        &self.0.kind
    }

    /// Returns the id or name, `None` for partial keys.
    pub fn id(&self) -> Option<&KeyId> {
        self.0.id.as_ref()
    }

    /// Returns the numeric id, if this key has one.
    pub fn int_id(&self) -> Option<i64> {
        match self.0.id {
            Some(KeyId::Id(id)) => Some(id),
            _ => None,
        }
    }

    /// Returns the string name, if this key has one.
    pub fn str_id(&self) -> Option<&str> {
        match &self.0.id {
            Some(KeyId::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// Returns the parent key.
    pub fn parent(&self) -> Option<&Key> {
        self.0.parent.as_ref()
    }

    /// Returns the namespace, `None` for the default namespace.
    pub fn namespace(&self) -> Option<&str> {
        self.0.namespace.as_deref()
    }

    fn namespace_owned(&self) -> Option<String> {
        self.0.namespace.clone()
    }

    /// Returns true if this key has neither id nor name.
    pub fn is_partial(&self) -> bool {
        self.0.id.is_none()
    }

    /// Returns true if this key has an id or name.
    pub fn is_complete(&self) -> bool {
        !self.is_partial()
    }

    /// Returns the full ancestor path, root first.
    pub fn path(&self) -> Vec<PathElement> {
        let mut path = self.parent().map(Key::path).unwrap_or_default();
        path.push(PathElement::new(self.0.kind.clone(), self.0.id.clone()));
        path
    }

    /// Returns the root of this key's ancestor path.
    pub fn root(&self) -> &Key {
        let mut key = self;
        while let Some(parent) = key.parent() {
            key = parent;
        }
        key
    }

    /// Returns true if `ancestor` is this key or one of its parents.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut key = Some(self);
        while let Some(current) = key {
            if current == ancestor {
                return true;
            }
            key = current.parent();
        }
        false
    }

    /// Checks that this key is well formed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or reserved kind, a
    /// non-positive id, or an empty, reserved or overlong name anywhere in
    /// the path.
    pub fn validate(&self) -> CoreResult<()> {
        let mut key = Some(self);
        while let Some(current) = key {
            let kind = current.kind();
            if kind.is_empty() || is_reserved(kind) {
                return Err(CoreError::invalid_argument(format!(
                    "invalid kind {kind:?} in key {self}"
                )));
            }
            match current.id() {
                Some(KeyId::Id(id)) if *id <= 0 => {
                    return Err(CoreError::invalid_argument(format!(
                        "key ids must be positive, got {id} in {self}"
                    )));
                }
                Some(KeyId::Name(name))
                    if name.is_empty() || is_reserved(name) || name.len() > MAX_NAME_LENGTH =>
                {
                    return Err(CoreError::invalid_argument(format!(
                        "invalid key name {name:?} in {self}"
                    )));
                }
                _ => {}
            }
            key = current.parent();
        }
        Ok(())
    }

    /// Checks that this key is well formed and complete.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the key is partial or malformed.
    pub fn validate_complete(&self) -> CoreResult<()> {
        if self.is_partial() {
            return Err(CoreError::invalid_argument(format!("key {self} is partial")));
        }
        self.validate()
    }
}

fn is_reserved(s: &str) -> bool {
    s.len() > 4 && s.starts_with("__") && s.ends_with("__")
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by namespace, then by path elements from the root; an ancestor
/// sorts before its descendants.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ordering::Equal;
        }
        self.namespace().cmp(&other.namespace()).then_with(|| {
            let (depth, other_depth) = (self.depth(), other.depth());
            let common = depth.min(other_depth);
            cmp_paths(
                self.ancestor_at(depth, common),
                other.ancestor_at(other_depth, common),
            )
            .then(depth.cmp(&other_depth))
        })
    }
}

impl Key {
    fn depth(&self) -> usize {
        let mut depth = 1;
        let mut key = self;
        while let Some(parent) = key.parent() {
            depth += 1;
            key = parent;
        }
        depth
    }

    /// Walks up from `depth` to the ancestor at `target` depth.
    fn ancestor_at(&self, depth: usize, target: usize) -> &Key {
        let mut key = self;
        for _ in target..depth {
            match key.parent() {
                Some(parent) => key = parent,
                None => break,
            }
        }
        key
    }
}

/// Compares two paths of equal depth, root first.
fn cmp_paths(a: &Key, b: &Key) -> Ordering {
    let parents = match (a.parent(), b.parent()) {
        (Some(pa), Some(pb)) => cmp_paths(pa, pb),
        _ => Ordering::Equal,
    };
    parents
        .then_with(|| a.kind().cmp(b.kind()))
        .then_with(|| a.id().cmp(&b.id()))
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = self.namespace() {
            write!(f, "{ns}:")?;
        }
        for (i, element) in self.path().iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match &element.id {
                Some(id) => write!(f, "{}({id})", element.kind)?,
                None => write!(f, "{}(?)", element.kind)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

/// Flat serialized form of a key.
#[derive(Serialize, Deserialize)]
struct KeyRepr {
    namespace: Option<String>,
    path: Vec<PathElement>,
}

impl From<Key> for KeyRepr {
    fn from(key: Key) -> Self {
        Self {
            namespace: key.namespace_owned(),
            path: key.path(),
        }
    }
}

impl TryFrom<KeyRepr> for Key {
    type Error = CoreError;

    fn try_from(repr: KeyRepr) -> CoreResult<Self> {
        Key::from_path(&repr.path, repr.namespace)
    }
}
