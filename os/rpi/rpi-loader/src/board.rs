//! Raspberry Pi 3 peripheral addresses as seen by the ARM cores.

use core::ops::Range;

/// Start of the peripheral window.
pub const MMIO_BASE: usize = 0x3F00_0000;

/// End of the peripheral window and of the 1 GiB the loader identity maps.
pub const MMIO_END: usize = 0x4000_0000;

/// The whole peripheral window, for device mappings.
pub const MMIO_RANGE: Range<u64> = MMIO_BASE as u64..MMIO_END as u64;

pub const UART0_BASE: usize = MMIO_BASE + 0x0020_1000;
pub const UART0_SIZE: usize = 0x1000;

pub const MAILBOX_BASE: usize = MMIO_BASE + 0x0000_B880;
pub const MAILBOX_SIZE: usize = 0x40;

/// Power management block holding the watchdog.
pub const PM_BASE: usize = MMIO_BASE + 0x0010_0000;
pub const PM_SIZE: usize = 0x100;

/// VideoCore bus addresses carry a cache alias in the top two bits.
pub const BUS_ADDRESS_MASK: u32 = 0x3FFF_FFFF;
