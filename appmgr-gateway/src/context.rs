//! Shared, read-only state handed to the pipeline and every handler.

use std::fmt;
use std::sync::Arc;

use appmgr_registry::AppRegistry;

use crate::{
    config::GatewayConfig,
    handlers::{self, Endpoint},
    router::{RouteError, Router},
    token::TokenService,
};

/// Everything a request needs, built once at startup.
///
/// Nothing in here is mutated after construction; the registry does its own
/// locking.
pub struct AppContext {
    pub tokens: TokenService,
    pub router: Router<Endpoint>,
    pub registry: Arc<dyn AppRegistry>,
}

impl AppContext {
    /// Build the context with the standard route table.
    ///
    /// # Errors
    /// Returns a [`RouteError`] if the route table is inconsistent.
    pub fn new(config: &GatewayConfig, registry: Arc<dyn AppRegistry>) -> Result<Self, RouteError> {
        let mut router = Router::new();
        for (method, pattern, endpoint) in handlers::routes() {
            router.register(&method, pattern, endpoint)?;
        }
        Ok(Self { tokens: TokenService::new(config.jwt.clone()), router, registry })
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("tokens", &self.tokens)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
