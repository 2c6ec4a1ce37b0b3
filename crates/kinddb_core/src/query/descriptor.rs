//! Immutable query descriptors.

use crate::adapter::ResultType;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::namespace;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

/// Default number of results fetched per backend batch.
pub const DEFAULT_BATCH_SIZE: usize = 300;

/// A filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `==`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Operator {
    /// Returns true for range operators.
    #[must_use]
    pub fn is_inequality(self) -> bool {
        !matches!(self, Self::Eq)
    }

    /// Returns true if `stored.cmp_index(operand)` satisfies this operator.
    #[must_use]
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// One conjunctive filter term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Property name.
    pub property: String,
    /// Comparison operator.
    pub op: Operator,
    /// Operand.
    pub value: Value,
}

impl Filter {
    /// Creates a filter term.
    pub fn new(property: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            property: property.into(),
            op,
            value: value.into(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One sort term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Property name.
    pub property: String,
    /// Direction.
    pub direction: Direction,
}

/// An immutable query descriptor.
///
/// Builder methods return a new descriptor and never change the one they
/// are called on. Nothing runs until [`Query::get`], [`Query::run`],
/// [`Query::paginate`] or [`Query::fetch_page`] is called.
///
/// ```rust
/// use kinddb_core::{Direction, Operator, Query};
///
/// let adults = Query::new("Person").filter("age", Operator::Ge, 18i64);
/// let by_age = adults.order_by("age", Direction::Descending);
/// assert!(adults.orders().is_empty());
/// assert_eq!(by_age.orders().len(), 1);
/// assert!(by_age.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    kind: Option<String>,
    namespace: Option<String>,
    ancestor: Option<Key>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    projection: Vec<String>,
    keys_only: bool,
    offset: usize,
    limit: Option<usize>,
    batch_size: usize,
    timeout: Option<Duration>,
}

impl Query {
    /// Creates a query over `kind` in the current namespace.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::kindless()
        }
    }

    /// Creates a query over every kind in the current namespace.
    pub fn kindless() -> Self {
        Self {
            kind: None,
            namespace: namespace::current(),
            ancestor: None,
            filters: Vec::new(),
            orders: Vec::new(),
            projection: Vec::new(),
            keys_only: false,
            offset: 0,
            limit: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: None,
        }
    }

    /// Replaces all filters with a single term.
    #[must_use]
    pub fn filter(&self, property: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        let mut query = self.clone();
        query.filters = vec![Filter::new(property, op, value)];
        query
    }

    /// Adds a conjunctive filter term.
    #[must_use]
    pub fn and_filter(
        &self,
        property: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Self {
        let mut query = self.clone();
        query.filters.push(Filter::new(property, op, value));
        query
    }

    /// Appends a sort term.
    #[must_use]
    pub fn order_by(&self, property: impl Into<String>, direction: Direction) -> Self {
        let mut query = self.clone();
        query.orders.push(Order {
            property: property.into(),
            direction,
        });
        query
    }

    /// Returns only the named properties.
    #[must_use]
    pub fn select<I, S>(&self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut query = self.clone();
        query.projection = properties.into_iter().map(Into::into).collect();
        query
    }

    /// Returns keys instead of records.
    #[must_use]
    pub fn keys_only(&self) -> Self {
        let mut query = self.clone();
        query.keys_only = true;
        query
    }

    /// Sets the kind.
    #[must_use]
    pub fn with_kind(&self, kind: impl Into<String>) -> Self {
        let mut query = self.clone();
        query.kind = Some(kind.into());
        query
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(&self, namespace: Option<String>) -> Self {
        let mut query = self.clone();
        query.namespace = namespace.filter(|ns| !ns.is_empty());
        query
    }

    /// Restricts results to descendants of `ancestor`, itself included.
    #[must_use]
    pub fn with_ancestor(&self, ancestor: Key) -> Self {
        let mut query = self.clone();
        query.ancestor = Some(ancestor);
        query
    }

    /// Caps the total number of results.
    #[must_use]
    pub fn with_limit(&self, limit: usize) -> Self {
        let mut query = self.clone();
        query.limit = Some(limit);
        query
    }

    /// Skips the first `offset` results.
    #[must_use]
    pub fn with_offset(&self, offset: usize) -> Self {
        let mut query = self.clone();
        query.offset = offset;
        query
    }

    /// Sets how many results each backend batch fetches.
    #[must_use]
    pub fn with_batch_size(&self, batch_size: usize) -> Self {
        let mut query = self.clone();
        query.batch_size = batch_size;
        query
    }

    /// Sets a per-batch deadline.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut query = self.clone();
        query.timeout = Some(timeout);
        query
    }

    /// Returns the kind.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Returns the namespace captured at construction.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the ancestor restriction.
    pub fn ancestor(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    /// Returns the filter terms.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns the declared sort terms.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Returns the projected properties.
    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    /// Returns true for keys-only queries.
    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Returns the offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the limit.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Returns the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the per-batch timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the result type this query asks for.
    pub fn result_type(&self) -> ResultType {
        if self.keys_only {
            ResultType::KeysOnly
        } else if self.projection.is_empty() {
            ResultType::Full
        } else {
            ResultType::Projection
        }
    }

    /// Returns the property constrained by inequality filters, if any.
    pub fn inequality_property(&self) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.op.is_inequality())
            .map(|f| f.property.as_str())
    }

    /// Returns the sort terms the backend applies.
    ///
    /// A query with an inequality filter and no declared order is ordered
    /// by the inequality property, ascending.
    pub fn effective_orders(&self) -> Vec<Order> {
        match (self.orders.is_empty(), self.inequality_property()) {
            (true, Some(property)) => vec![Order {
                property: property.to_string(),
                direction: Direction::Ascending,
            }],
            _ => self.orders.clone(),
        }
    }

    /// Checks the descriptor against the backend's indexing constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if inequality filters span more than one
    /// property, the first sort term is not the inequality property,
    /// keys-only is combined with a projection, the ancestor is partial or
    /// in another namespace, or the batch size is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::invalid_argument("batch size must be positive"));
        }
        if self.keys_only && !self.projection.is_empty() {
            return Err(CoreError::invalid_argument(
                "keys-only queries cannot have a projection",
            ));
        }
        if let Some(kind) = &self.kind {
            if kind.is_empty() {
                return Err(CoreError::invalid_argument("query kind must not be empty"));
            }
        }
        if let Some(ancestor) = &self.ancestor {
            ancestor.validate_complete()?;
            if ancestor.namespace() != self.namespace.as_deref() {
                return Err(CoreError::invalid_argument(format!(
                    "ancestor {ancestor} is not in query namespace {:?}",
                    self.namespace
                )));
            }
        }

        if let Some(inequality) = self.inequality_property() {
            if let Some(other) = self
                .filters
                .iter()
                .find(|f| f.op.is_inequality() && f.property != inequality)
            {
                return Err(CoreError::invalid_argument(format!(
                    "inequality filters on {inequality:?} and {:?}; only one property may have inequality filters",
                    other.property
                )));
            }
            if let Some(first) = self.orders.first() {
                if first.property != inequality {
                    return Err(CoreError::invalid_argument(format!(
                        "inequality property {inequality:?} must be the first sort order, found {:?}",
                        first.property
                    )));
                }
            }
        }
        Ok(())
    }
}
