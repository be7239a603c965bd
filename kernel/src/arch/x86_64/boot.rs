// Boot entry point for x86_64

use bootloader_api::{entry_point, BootInfo};

entry_point!(kernel_main);

fn kernel_main(_boot_info: &'static mut BootInfo) -> ! {
    crate::bootstrap::kernel_init_main();
    crate::arch::halt();
}