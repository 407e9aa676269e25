//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the core and the host MUST NOT sleep.
//! Timeouts use `tokio::time::timeout`; periodic work uses `tokio::time::interval`.

use architectural_enforcement::scan;

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|code| code.contains("::sleep(") || code.contains(".sleep("));

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse instead:");
        eprintln!("  - tokio::time::timeout() to bound a call");
        eprintln!("  - tokio::time::interval() for periodic tasks");
        eprintln!("  - channels or notifications to wait for events");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_no_blocking_mutex_in_production_code() {
    let violations = scan(|code| code.contains("std::sync::Mutex") || code.contains("std::sync::RwLock"));

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!(
            "\nFound {} std::sync lock(s); use parking_lot or tokio::sync instead.",
            violations.len()
        );
    }
}
