//! # Loader Debug Trace
//!
//! Best-effort, allocation-free diagnostic output for the boot loader. Text is
//! written byte by byte to a platform debug sink that works before any console
//! exists and after firmware services are gone:
//!
//! * **x86-64**: QEMU's debug console port `0x402` (`-debugcon stdio`).
//! * **AArch64**: the PL011 `UART0` data register of the Raspberry Pi 3
//!   (`-serial stdio` under QEMU's `raspi3b` machine).
//!
//! The sink is compiled in only for firmware and bare-metal targets with the
//! `enabled` feature; host builds (and therefore unit tests) get a no-op sink.
//!
//! ```rust,ignore
//! use loader_trace::debug_trace;
//!
//! debug_trace!("GPT entries at LBA {}\n", entries_lba);
//! ```
//!
//! [`TraceLogger`] routes the `log` facade into the same sink.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{TraceLogger, report_install};

#[cfg(all(feature = "enabled", any(target_os = "none", target_os = "uefi")))]
#[doc(hidden)]
pub mod trace_fmt {
    use core::fmt::{self, Write};

    #[cfg(target_arch = "x86_64")]
    mod port {
        /// The port number for QEMU's debug port.
        const QEMU_DEBUG_PORT: u16 = 0x402;

        #[allow(clippy::inline_always)]
        #[inline(always)]
        pub fn putc(c: u8) {
            unsafe {
                core::arch::asm!(
                    "out dx, al",
                    in("dx") QEMU_DEBUG_PORT,
                    in("al") c,
                    options(nomem, nostack, preserves_flags)
                );
            }
        }
    }

    #[cfg(target_arch = "aarch64")]
    mod port {
        use loader_mmio::MmioRegion;

        const UART0_BASE: usize = 0x3F20_1000;
        const UART0_DR: usize = 0x00;
        const UART0_FR: usize = 0x18;
        const FR_TXFF: u32 = 1 << 5;
        const TX_POLL_BUDGET: usize = 10_000;

        pub fn putc(c: u8) {
            // SAFETY: the PL011 block is identity mapped as device memory for the loader's lifetime.
            let uart = unsafe { MmioRegion::new(UART0_BASE, 0x1000) };
            // Drop the byte rather than hang if the FIFO never drains.
            if uart.poll32(UART0_FR, |fr| fr & FR_TXFF == 0, TX_POLL_BUDGET) {
                uart.write32(UART0_DR, u32::from(c));
            }
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    mod port {
        pub const fn putc(_c: u8) {}
    }

    pub struct TraceSink;

    impl Write for TraceSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                if b == b'\n' {
                    port::putc(b'\r');
                }
                port::putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn trace_write(args: fmt::Arguments) {
        // Best-effort output; errors are ignored.
        let _ = fmt::write(&mut TraceSink, args);
    }
}

#[cfg(not(all(feature = "enabled", any(target_os = "none", target_os = "uefi"))))]
#[doc(hidden)]
pub mod trace_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub const fn trace_write(_: fmt::Arguments) {}
}

/// Writes formatted text to the debug sink without allocating.
#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {{
        $crate::trace_fmt::trace_write(core::format_args!($($arg)*));
    }};
}
