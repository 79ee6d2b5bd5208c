//! # Memory Layout

/// Page size used for every mapping and every buffer handed to the kernel.
pub const PAGE_SIZE: usize = 4096;

/// Large block size used for identity and framebuffer mappings.
pub const LARGE_PAGE_SIZE: u64 = 0x20_0000; // 2 MiB

/// Virtual address reserved for the kernel's own MMIO mappings.
pub const BOOTBOOT_MMIO: u64 = 0xffff_ffff_f800_0000;

/// Virtual address of the linear framebuffer.
pub const BOOTBOOT_FB: u64 = 0xffff_ffff_fc00_0000;

/// Virtual address of the handoff page.
pub const BOOTBOOT_INFO: u64 = 0xffff_ffff_ffe0_0000;

/// Virtual address of the environment page.
pub const BOOTBOOT_ENV: u64 = 0xffff_ffff_ffe0_1000;

/// Virtual address the first page of the kernel image is mapped to.
pub const BOOTBOOT_CORE: u64 = 0xffff_ffff_ffe0_2000;

/// Virtual address of the kernel stack page (last slot of the core window).
pub const BOOTBOOT_STACK: u64 = 0xffff_ffff_ffff_f000;

/// Initial stack pointer: the top of [`BOOTBOOT_STACK`], which wraps to zero.
pub const BOOTBOOT_STACK_TOP: u64 = BOOTBOOT_STACK.wrapping_add(PAGE_SIZE as u64);

/// Bytes available to the framebuffer window.
pub const FB_WINDOW_SIZE: u64 = BOOTBOOT_INFO - BOOTBOOT_FB;

/// Number of 4 KiB slots in the core window usable by the kernel image
/// (slot 0 is the handoff page, slot 1 the environment, slot 511 the stack).
pub const CORE_WINDOW_PAGES: usize = 509;

/// Size of the environment page; its last byte is always NUL.
pub const ENVIRONMENT_SIZE: usize = PAGE_SIZE;

/// Upper bound for an uncompressed ramdisk on platforms that reserve a fixed area.
pub const INITRD_MAXSIZE: usize = 16 * 1024 * 1024;

/// Rounds `value` up to the next multiple of [`PAGE_SIZE`].
#[must_use]
pub const fn page_align_up(value: u64) -> u64 {
    (value + (PAGE_SIZE as u64 - 1)) & !(PAGE_SIZE as u64 - 1)
}

const _: () = {
    assert!(BOOTBOOT_FB.is_multiple_of(LARGE_PAGE_SIZE));
    assert!(FB_WINDOW_SIZE == 31 * LARGE_PAGE_SIZE);
    assert!(BOOTBOOT_ENV == BOOTBOOT_INFO + PAGE_SIZE as u64);
    assert!(BOOTBOOT_CORE == BOOTBOOT_ENV + PAGE_SIZE as u64);
    assert!(BOOTBOOT_STACK == BOOTBOOT_INFO + 511 * PAGE_SIZE as u64);
    assert!(BOOTBOOT_STACK_TOP == 0);
    assert!(BOOTBOOT_CORE + (CORE_WINDOW_PAGES * PAGE_SIZE) as u64 == BOOTBOOT_STACK);
};
