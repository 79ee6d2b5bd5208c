//! Full chip reset through the power management watchdog.

use loader_mmio::MmioRegion;

const RSTC: usize = 0x1C;
const WDOG: usize = 0x24;

/// Every write to the PM block must carry the password in the top byte.
const PASSWORD: u32 = 0x5A00_0000;
const RSTC_FULL_RESET: u32 = 0x20;
const RSTC_CONFIG_MASK: u32 = 0x30;

/// Watchdog ticks (about 15 µs each) before the reset fires.
const RESET_TICKS: u32 = 10;

pub struct Watchdog {
    regs: MmioRegion,
}

impl Watchdog {
    #[must_use]
    pub const fn new(regs: MmioRegion) -> Self {
        Self { regs }
    }

    /// Arms the watchdog for a full reset after `ticks`.
    pub fn arm(&self, ticks: u32) {
        self.regs.write32(WDOG, PASSWORD | (ticks & 0x000F_FFFF));
        self.regs
            .modify32(RSTC, |rstc| PASSWORD | (rstc & !RSTC_CONFIG_MASK & 0x00FF_FFFF) | RSTC_FULL_RESET);
    }

    /// Resets the board and waits for it to happen.
    pub fn reset(&self) -> ! {
        log::info!("Resetting through the watchdog");
        self.arm(RESET_TICKS);
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_writes_password_protected_values() {
        let mut regs = [0u32; 16];
        regs[RSTC / 4] = 0x0000_0102;
        let watchdog = Watchdog::new(unsafe { MmioRegion::new(regs.as_mut_ptr() as usize, regs.len() * 4) });
        watchdog.arm(10);
        assert_eq!(regs[WDOG / 4], 0x5A00_000A);
        assert_eq!(regs[RSTC / 4], 0x5A00_0122);
    }
}
