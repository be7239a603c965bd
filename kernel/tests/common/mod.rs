//! Common test utilities and helpers for kernel integration tests

use crate::{serial_println, test_framework::*};

/// Initialize test environment for a specific subsystem
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} Test Suite ===", subsystem);

    // Initialize subsystems needed for testing
    #[cfg(feature = "alloc")]
    if crate::test_framework::TEST_REGISTRY.is_none() {
        crate::test_framework::init_test_registry();
    }
}

/// Assertion helpers for kernel tests
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => {
                serial_println!("Assertion failed: {:?} is not Ok", e);
                panic!("Expected Ok, got Err");
            }
        }
    };
}

#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => {
                serial_println!("Assertion failed: result is Ok");
                panic!("Expected Err, got Ok");
            }
            Err(e) => e,
        }
    };
}

/// Performance assertion for benchmarks
#[macro_export]
macro_rules! assert_performance {
    ($time_ns:expr, < $limit_ns:expr) => {
        if $time_ns >= $limit_ns {
            serial_println!(
                "Performance assertion failed: {} ns >= {} ns",
                $time_ns,
                $limit_ns
            );
            panic!("Performance requirement not met");
        }
    };
}
