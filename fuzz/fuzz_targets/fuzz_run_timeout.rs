//! Fuzz target: test-run timeout clamping.

#![no_main]

use appmgr_core::RunTimeout;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|requested: i64| {
    let timeout = RunTimeout::clamp(requested);
    assert!((-60..=60).contains(&timeout.seconds()));
    assert_ne!(timeout.seconds(), 0);
    if (1..=60).contains(&requested) || (-60..0).contains(&requested) {
        assert_eq!(i64::from(timeout.seconds()), requested);
    }
});
