//! Driver interface
//!
//! The function-table contract every driver binds to ([`interface`]) and
//! the plug-and-play id matching that attaches a driver to a newly
//! discovered device ([`pnp`]). Concrete bus and device drivers are outside
//! this kernel's scope; this module only supplies the contract they would
//! be written against.

pub mod interface;
pub mod pnp;

/// Initialize the driver framework.
pub fn init() {
    interface::init();
    crate::println!("[DRIVERS] driver interface initialized");
}
