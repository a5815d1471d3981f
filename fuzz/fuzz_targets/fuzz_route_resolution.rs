//! Fuzz target: route resolution over the service route table.
//!
//! Arbitrary paths must resolve without panicking, and a match must carry
//! exactly one non-empty application name for the `/app/...` routes.

#![no_main]

use appmgr_gateway::handlers::{routes, Endpoint};
use appmgr_gateway::router::{Resolution, Router, SUPPORTED_METHODS};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(path) = std::str::from_utf8(data) else {
        return;
    };
    let mut router = Router::new();
    for (method, pattern, endpoint) in routes() {
        if let Err(e) = router.register(&method, pattern, endpoint) {
            panic!("route table rejected: {e}");
        }
    }
    for method in &SUPPORTED_METHODS {
        if let Resolution::Matched(m) = router.resolve(method, path) {
            if matches!(*m.route.handler(), Endpoint::GetApp | Endpoint::DeleteApp) {
                assert_eq!(m.params.len(), 1);
                assert!(!m.params[0].is_empty() && !m.params[0].contains('/'));
            }
        }
    }
});
