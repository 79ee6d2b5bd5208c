//! # PL011 Console
//!
//! `UART0` is the loader's console on the Raspberry Pi: panic messages go out
//! here, and the failure path reads a key from it before resetting.

use core::fmt;
use loader_mmio::MmioRegion;

const DR: usize = 0x00;
const FR: usize = 0x18;
const IBRD: usize = 0x24;
const FBRD: usize = 0x28;
const LCR_H: usize = 0x2C;
const CR: usize = 0x30;
const ICR: usize = 0x44;

const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;

const CR_UARTEN: u32 = 1 << 0;
const CR_TXE: u32 = 1 << 8;
const CR_RXE: u32 = 1 << 9;

const LCR_H_FEN: u32 = 1 << 4;
const LCR_H_WLEN_8: u32 = 3 << 5;

const ICR_ALL: u32 = 0x7FF;

/// 115200 baud from the 48 MHz UART clock the firmware configures.
const BAUD_DIVISOR_INT: u32 = 26;
const BAUD_DIVISOR_FRAC: u32 = 3;

/// Flag register reads before a byte is dropped.
const TX_POLL_BUDGET: usize = 10_000;

pub struct Pl011 {
    regs: MmioRegion,
}

impl Pl011 {
    #[must_use]
    pub const fn new(regs: MmioRegion) -> Self {
        Self { regs }
    }

    /// 8N1 at 115200 baud with FIFOs, transmit and receive enabled.
    pub fn init(&self) {
        self.regs.write32(CR, 0);
        self.regs.write32(ICR, ICR_ALL);
        self.regs.write32(IBRD, BAUD_DIVISOR_INT);
        self.regs.write32(FBRD, BAUD_DIVISOR_FRAC);
        self.regs.write32(LCR_H, LCR_H_FEN | LCR_H_WLEN_8);
        self.regs.write32(CR, CR_UARTEN | CR_TXE | CR_RXE);
    }

    /// Sends one byte.
    ///
    /// # Errors
    /// The byte is dropped if the transmit FIFO never drains.
    pub fn putc(&self, byte: u8) -> fmt::Result {
        if self.regs.poll32(FR, |fr| fr & FR_TXFF == 0, TX_POLL_BUDGET) {
            self.regs.write32(DR, u32::from(byte));
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }

    /// The next received byte, if one arrives within `budget` polls.
    #[must_use]
    pub fn getc(&self, budget: usize) -> Option<u8> {
        if self.regs.poll32(FR, |fr| fr & FR_RXFE == 0, budget) {
            Some(self.regs.read32(DR).to_le_bytes()[0])
        } else {
            None
        }
    }
}

impl fmt::Write for Pl011 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.putc(b'\r')?;
            }
            self.putc(b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    fn uart_over(regs: &mut [u32; 32]) -> Pl011 {
        Pl011::new(unsafe { MmioRegion::new(regs.as_mut_ptr() as usize, regs.len() * 4) })
    }

    #[test]
    fn init_programs_line_and_enables_the_uart() {
        let mut regs = [0u32; 32];
        uart_over(&mut regs).init();
        assert_eq!(regs[IBRD / 4], 26);
        assert_eq!(regs[FBRD / 4], 3);
        assert_eq!(regs[LCR_H / 4], 0x70);
        assert_eq!(regs[CR / 4], 0x301);
    }

    #[test]
    fn full_fifo_drops_output() {
        let mut regs = [0u32; 32];
        regs[FR / 4] = FR_TXFF;
        let mut uart = uart_over(&mut regs);
        assert!(write!(uart, "lost").is_err());
        assert_eq!(regs[DR / 4], 0);
    }

    #[test]
    fn writes_reach_the_data_register() {
        let mut regs = [0u32; 32];
        regs[FR / 4] = FR_RXFE;
        let mut uart = uart_over(&mut regs);
        write!(uart, "ok").expect("fifo has room");
        assert_eq!(regs[DR / 4], u32::from(b'k'));
    }

    #[test]
    fn getc_times_out_on_an_empty_fifo() {
        let mut regs = [0u32; 32];
        regs[FR / 4] = FR_RXFE;
        assert_eq!(uart_over(&mut regs).getc(8), None);

        regs[FR / 4] = 0;
        regs[DR / 4] = 0x100 | u32::from(b'y');
        assert_eq!(uart_over(&mut regs).getc(1), Some(b'y'));
    }
}
