//! Pattern-based request routing.
//!
//! Each HTTP method owns an ordered table of routes keyed by pattern string.
//! A pattern is either a literal path or a regular expression that must
//! match the whole path. Resolution is deterministic:
//!
//! 1. the root path resolves to the built-in service banner;
//! 2. a route whose pattern equals the path verbatim wins;
//! 3. otherwise patterns are tried in registration order.
//!
//! Tables are built once at startup and only read afterwards, so a
//! [`Router`] can be shared between request tasks without locking.

use axum::http::Method;
use indexmap::IndexMap;
use regex::Regex;

/// Methods that have a routing table.
pub const SUPPORTED_METHODS: [Method; 4] = [Method::GET, Method::PUT, Method::POST, Method::DELETE];

/// Errors raised while building a routing table.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RouteError {
    /// The pattern is not a valid regular expression.
    #[error("invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Two patterns for the same method can match the same path.
    #[error("route pattern '{pattern}' overlaps '{existing}' for {method}")]
    Overlap { method: Method, pattern: String, existing: String },

    /// Only GET, PUT, POST and DELETE are routable.
    #[error("method {0} is not supported")]
    UnsupportedMethod(Method),
}

/// One `(pattern, handler)` binding.
#[derive(Debug, Clone)]
pub struct Route<H> {
    pattern: String,
    matcher: Regex,
    literal: bool,
    handler: H,
}

impl<H> Route<H> {
    fn compile(pattern: &str, handler: H) -> Result<Self, RouteError> {
        let matcher = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            RouteError::InvalidPattern { pattern: pattern.to_owned(), source }
        })?;
        Ok(Self {
            pattern: pattern.to_owned(),
            matcher,
            literal: is_literal(pattern),
            handler,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Whether two non-literal patterns visibly overlap: either one fully
    /// matches the other's source text.
    fn overlaps(&self, other: &Self) -> bool {
        !self.literal
            && !other.literal
            && (self.matcher.is_match(&other.pattern) || other.matcher.is_match(&self.pattern))
    }
}

/// A resolved route plus the values captured by its pattern's groups.
#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    pub route: &'a Route<H>,
    pub params: Vec<String>,
}

/// Outcome of [`Router::resolve`].
#[derive(Debug)]
pub enum Resolution<'a, H> {
    /// The root path; answered with the service banner.
    Root,
    Matched(RouteMatch<'a, H>),
    NotFound,
}

/// Per-method routing tables.
#[derive(Debug, Clone)]
pub struct Router<H> {
    tables: IndexMap<Method, IndexMap<String, Route<H>>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Router<H> {
    #[must_use]
    pub fn new() -> Self {
        let tables = SUPPORTED_METHODS.iter().map(|m| (m.clone(), IndexMap::new())).collect();
        Self { tables }
    }

    /// Add a route to `method`'s table.
    ///
    /// Registering an identical pattern again replaces its handler in place.
    ///
    /// # Errors
    /// Returns [`RouteError::UnsupportedMethod`], [`RouteError::InvalidPattern`]
    /// or [`RouteError::Overlap`].
    pub fn register(&mut self, method: &Method, pattern: &str, handler: H) -> Result<(), RouteError> {
        let table = self
            .tables
            .get_mut(method)
            .ok_or_else(|| RouteError::UnsupportedMethod(method.clone()))?;
        let route = Route::compile(pattern, handler)?;

        if let Some(existing) = table
            .values()
            .find(|existing| existing.pattern != route.pattern && existing.overlaps(&route))
        {
            return Err(RouteError::Overlap {
                method: method.clone(),
                pattern: pattern.to_owned(),
                existing: existing.pattern.clone(),
            });
        }

        tracing::debug!(%method, pattern, "route registered");
        if table.insert(pattern.to_owned(), route).is_some() {
            tracing::warn!(%method, pattern, "route re-registered; previous handler replaced");
        }
        Ok(())
    }

    /// Resolve `(method, path)` to a route.
    ///
    /// `path` is normalized with [`normalize_path`] first.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_, H> {
        let path = normalize_path(path);
        if path == "/" {
            return Resolution::Root;
        }
        let Some(table) = self.tables.get(method) else {
            return Resolution::NotFound;
        };

        if let Some(route) = table.get(path.as_str()) {
            return Resolution::Matched(RouteMatch { params: captures(route, &path), route });
        }
        table
            .values()
            .find(|route| route.matcher.is_match(&path))
            .map_or(Resolution::NotFound, |route| {
                Resolution::Matched(RouteMatch { params: captures(route, &path), route })
            })
    }

    /// Iterate over every route as `(method, pattern)` in table order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.tables
            .iter()
            .flat_map(|(method, table)| table.keys().map(move |p| (method, p.as_str())))
    }
}

fn is_literal(pattern: &str) -> bool {
    !pattern.chars().any(|c| r"\.+*?()|[]{}^$".contains(c))
}

fn captures<H>(route: &Route<H>, path: &str) -> Vec<String> {
    route
        .matcher
        .captures(path)
        .map(|caps| caps.iter().skip(1).flatten().map(|m| m.as_str().to_owned()).collect())
        .unwrap_or_default()
}

/// Collapse runs of `/` into one; an empty path becomes `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
