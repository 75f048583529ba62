//! Query keys.
//!
//! A [`Query`] names one cacheable item: a namespace plus an ordered list of
//! string parameters. Both cache tiers and the single-flight coordinator
//! address items by the query's full key.
//!
//! # Key Format
//!
//! - Path: `?{p1}&{p2}&...` (empty when there are no parameters)
//! - Full key: `{namespace}:{path}` (e.g., `"user:?42"`)
//!
//! `%` and `&` inside a parameter are escaped as `%25` and `%26`, so two
//! different parameter lists never produce the same path. In the namespace
//! part of the key `%` and `:` are escaped as `%25` and `%3A`, so the first
//! `:` of a full key always ends the namespace and keys from different
//! namespaces never collide.
//!
//! # Payload
//!
//! A query can carry an arbitrary payload for its loader. The payload is
//! not part of the key: two queries with the same namespace and parameters
//! address the same cache entry whatever they carry, so callers must keep
//! the payload consistent for a given key.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;

/// Errors raised while building a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The namespace was empty.
    #[error("query namespace must not be empty")]
    EmptyNamespace,
}

/// Opaque data attached to a query for its loader.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Identifies a cacheable item by namespace and ordered parameters.
///
/// Cloning is cheap: the key material is shared.
#[derive(Clone)]
pub struct Query {
    key: Arc<QueryKey>,
    payload: Option<Payload>,
}

#[derive(Debug)]
struct QueryKey {
    namespace: String,
    params: Vec<String>,
    path: String,
    full_key: String,
}

impl Query {
    /// Create a query.
    ///
    /// # Panics
    ///
    /// Panics if `namespace` is empty. Use [`Query::try_new`] to get an
    /// error instead.
    pub fn new<N, I, P>(namespace: N, params: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        match Self::try_new(namespace, params) {
            Ok(query) => query,
            Err(e) => panic!("invalid query: {}", e),
        }
    }

    /// Create a query without parameters.
    ///
    /// # Panics
    ///
    /// Panics if `namespace` is empty.
    pub fn without_params(namespace: impl Into<String>) -> Self {
        Self::new(namespace, std::iter::empty::<String>())
    }

    /// Create a query, returning an error if the namespace is empty.
    pub fn try_new<N, I, P>(namespace: N, params: I) -> Result<Self, QueryError>
    where
        N: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(QueryError::EmptyNamespace);
        }

        let params: Vec<String> = params.into_iter().map(Into::into).collect();
        let path = build_path(&params);
        let full_key = format!("{}{}", Self::namespace_prefix(&namespace), path);

        Ok(Self {
            key: Arc::new(QueryKey {
                namespace,
                params,
                path,
                full_key,
            }),
            payload: None,
        })
    }

    /// Attach a payload for the loader. Does not change the key.
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Attach an already shared payload.
    pub fn with_shared_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The namespace this query belongs to.
    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    /// The ordered parameters.
    pub fn params(&self) -> &[String] {
        &self.key.params
    }

    /// The encoded parameter path (without the namespace).
    pub fn path(&self) -> &str {
        &self.key.path
    }

    /// Namespace plus path; the address used by tiers and single-flight.
    pub fn full_key(&self) -> &str {
        &self.key.full_key
    }

    /// The full-key prefix shared by every query in `namespace`.
    ///
    /// ```ignore
    /// assert_eq!(Query::namespace_prefix("user"), "user:");
    /// assert_eq!(Query::namespace_prefix("a:b"), "a%3Ab:");
    /// ```
    pub fn namespace_prefix(namespace: &str) -> String {
        let mut prefix = String::with_capacity(namespace.len() + 1);
        for ch in namespace.chars() {
            match ch {
                '%' => prefix.push_str("%25"),
                ':' => prefix.push_str("%3A"),
                c => prefix.push(c),
            }
        }
        prefix.push(':');
        prefix
    }

    /// The payload, if one of type `T` is attached.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    /// Whether any payload is attached.
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

fn build_path(params: &[String]) -> String {
    if params.is_empty() {
        return String::new();
    }

    let mut path = String::with_capacity(params.iter().map(|p| p.len() + 1).sum::<usize>() + 1);
    path.push('?');
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            path.push('&');
        }
        for ch in param.chars() {
            match ch {
                '%' => path.push_str("%25"),
                '&' => path.push_str("%26"),
                c => path.push(c),
            }
        }
    }
    path
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.full_key() == other.full_key()
    }
}

impl Eq for Query {}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_key().hash(state);
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_key())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("namespace", &self.key.namespace)
            .field("params", &self.key.params)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}
