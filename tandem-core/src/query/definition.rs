use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::filter::Filter;
use crate::clock::CausalClock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Can't define limit for unordered query")]
    UnorderedLimit,

    #[error("Can't define offset for unordered query")]
    UnorderedOffset,
}

/// Ordering instruction for one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortOrder {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

#[derive(Deserialize)]
struct RawQuery {
    entity_name: String,
    #[serde(default)]
    filter: Filter,
    #[serde(default)]
    ordering: Vec<SortOrder>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// A filtered, optionally ordered and paginated view of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawQuery")]
pub struct Query {
    entity_name: String,
    filter: Filter,
    ordering: Vec<SortOrder>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl TryFrom<RawQuery> for Query {
    type Error = QueryError;

    fn try_from(raw: RawQuery) -> Result<Self, Self::Error> {
        Query::new(raw.entity_name, raw.filter, raw.ordering, raw.limit, raw.offset)
    }
}

impl Query {
    /// Fails if `limit` or `offset` is given without an ordering.
    pub fn new(
        entity_name: impl Into<String>,
        filter: Filter,
        ordering: Vec<SortOrder>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Self, QueryError> {
        if ordering.is_empty() {
            if limit.is_some() {
                return Err(QueryError::UnorderedLimit);
            }
            if offset.is_some() {
                return Err(QueryError::UnorderedOffset);
            }
        }
        Ok(Self {
            entity_name: entity_name.into(),
            filter,
            ordering,
            limit,
            offset,
        })
    }

    /// Unordered, unpaginated query.
    pub fn filtered(entity_name: impl Into<String>, filter: Filter) -> Self {
        Self {
            entity_name: entity_name.into(),
            filter,
            ordering: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn ordering(&self) -> &[SortOrder] {
        &self.ordering
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Stable identifier derived from the query's content.
    pub fn id(&self) -> QueryId {
        // Plain data with string keys always serializes.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        QueryId(bs58::encode(&digest[..16]).with_check().into_string())
    }
}

/// Content hash of a [`Query`], bs58check-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A query together with the private clock of what this store has seen of
/// its result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedQuery {
    pub query: Query,
    pub vector_clock: CausalClock,
}

impl TrackedQuery {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            vector_clock: CausalClock::empty(),
        }
    }

    pub fn id(&self) -> QueryId {
        self.query.id()
    }
}
