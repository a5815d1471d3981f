//! Fuzz target: token verification on untrusted input.
//!
//! Arbitrary bearer strings must be rejected with an error, never a panic,
//! and never accepted without the signing secret.

#![no_main]

use appmgr_core::Role;
use appmgr_gateway::config::{JwtConfig, PrincipalConfig};
use appmgr_gateway::TokenService;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };
    let tokens = TokenService::new(JwtConfig {
        enabled: true,
        admin: PrincipalConfig::new("admin", "fuzz-admin-secret"),
        user: PrincipalConfig::new("user", "fuzz-user-secret"),
    });
    assert!(tokens.verify_role(Role::Admin, token).is_err());
    assert!(tokens.verify_any_role(token).is_err());
});
