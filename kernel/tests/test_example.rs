//! Example tests using the custom test framework
//!
//! This demonstrates how to write tests that bypass lang_items conflicts.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_framework::test_runner)]
#![reexport_test_harness_main = "test_main"]

use obos_kernel::{kernel_assert, kernel_assert_eq, kernel_test, test_module};

// Example unit tests
test_module!(basic_tests,
    test_addition => {
        let result = 2 + 2;
        kernel_assert_eq!(result, 4);
        Ok(())
    },

    test_memory_allocation => {
        // Test basic memory operations
        let value = 42u32;
        let ptr = &value as *const u32;
        kernel_assert!(!ptr.is_null());
        kernel_assert_eq!(unsafe { *ptr }, 42);
        Ok(())
    }
);

// Example integration tests
test_module!(integration_tests,
    test_process_creation => {
        use obos_kernel::process;

        // Test process creation (will fail in test environment)
        // This demonstrates error handling
        match process::create_process("test", 0) {
            Ok(_) => Err("Process creation should fail in test environment"),
            Err(_) => Ok(()), // Expected to fail
        }
    }
);

// Example benchmark
#[cfg(feature = "benchmarks")]
mod benchmarks {
    use obos_kernel::{kernel_bench, test_framework::BenchmarkRunner};

    kernel_bench!(bench_atomic_increment, {
        use core::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        COUNTER.fetch_add(1, Ordering::Relaxed);
    });

    kernel_bench!(bench_spinlock, {
        use obos_kernel::sync::SpinLock;
        static LOCK: SpinLock<u64> = SpinLock::new(0);

        let mut guard = LOCK.lock();
        *guard += 1;
    });
}

// Entry point for test binary
#[no_mangle]
pub extern "C" fn _start() -> ! {
    obos_kernel::arch::init();
    obos_kernel::serial_println!("\n=== Running Example Tests ===\n");

    test_main();

    loop {
        obos_kernel::arch::halt();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    obos_kernel::test_framework::test_panic_handler(info)
}
