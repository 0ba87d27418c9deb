//! Cache key construction and query fingerprinting
//!
//! Keys are structured `(scope, user, fingerprint)` triples. Fingerprints
//! are canonical: filter clauses are sorted before encoding, so two queries
//! built with the same clauses in different order share one cache entry.
//! Sort directives keep their order because sort order is semantic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for a query filter clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Field equals value
    Eq,
    /// Field does not equal value
    Ne,
    /// Field is less than value
    Lt,
    /// Field is less than or equal to value
    Le,
    /// Field is greater than value
    Gt,
    /// Field is greater than or equal to value
    Ge,
    /// Array field contains value
    Contains,
    /// Field is one of the values
    In,
}

impl FilterOp {
    fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Contains => "contains",
            FilterOp::In => "in",
        }
    }
}

/// One filter clause: `field op value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Record field the clause applies to
    pub field: String,
    /// Comparison operator
    pub op: FilterOp,
    /// Comparison value (JSON-encoded, like the records themselves)
    pub value: Value,
}

impl FieldFilter {
    /// Build a clause
    pub fn new(field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    fn canonical(&self) -> String {
        // Value's Display is compact JSON, stable for scalar values
        format!("{}{}{}", self.field, self.op.as_str(), self.value)
    }
}

/// Sort directive for a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to sort on
    pub field: String,
    /// Descending when true, ascending otherwise
    pub descending: bool,
}

/// Description of a multi-record query against one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Remote collection the query runs against
    pub collection: String,
    /// Filter clauses (conjunctive)
    pub filters: Vec<FieldFilter>,
    /// Sort directives, applied in order
    pub order_by: Vec<OrderBy>,
    /// Maximum number of records to return
    pub limit: Option<u32>,
}

impl QueryDescriptor {
    /// Query over a whole collection
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Add a filter clause
    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter::new(field, op, value));
        self
    }

    /// Add a sort directive
    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            descending,
        });
        self
    }

    /// Cap the number of returned records
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Canonical fingerprint of this query's parameters
    ///
    /// Filter clauses are sorted so construction order does not produce
    /// distinct cache entries for the same query. Sort directives are not
    /// reordered.
    pub fn fingerprint(&self) -> String {
        let mut filters: Vec<String> = self.filters.iter().map(FieldFilter::canonical).collect();
        filters.sort_unstable();

        let orders: Vec<String> = self
            .order_by
            .iter()
            .map(|o| {
                format!(
                    "{}.{}",
                    o.field,
                    if o.descending { "desc" } else { "asc" }
                )
            })
            .collect();

        let mut parts = Vec::new();
        if !filters.is_empty() {
            parts.push(format!("f={}", filters.join(",")));
        }
        if !orders.is_empty() {
            parts.push(format!("o={}", orders.join(",")));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("l={}", limit));
        }

        let mut fp = format!("q/{}", self.collection);
        if !parts.is_empty() {
            fp.push('?');
            fp.push_str(&parts.join("&"));
        }
        fp
    }
}

/// Structured cache key; opaque outside the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub(crate) scope: String,
    pub(crate) user: Option<String>,
    pub(crate) fingerprint: String,
}

impl CacheKey {
    /// Key for a collection query within a scope
    pub(crate) fn query(scope: &str, query: Option<&QueryDescriptor>, user: Option<&str>) -> Self {
        Self {
            scope: scope.to_string(),
            user: user.map(str::to_string),
            fingerprint: query
                .map(QueryDescriptor::fingerprint)
                .unwrap_or_else(|| "q/*".to_string()),
        }
    }

    /// Key for a single document within a scope
    pub(crate) fn document(scope: &str, id: &str, user: Option<&str>) -> Self {
        Self {
            scope: scope.to_string(),
            user: user.map(str::to_string),
            fingerprint: format!("doc/{}", id),
        }
    }
}
