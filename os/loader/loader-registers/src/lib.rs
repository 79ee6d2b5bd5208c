//! # Typed Translation Control Registers
//!
//! Bit-exact models of the registers the loader programs when it turns on its
//! own page tables:
//!
//! * x86-64: [`cr3::Cr3`].
//! * AArch64: [`mair::Mair`], [`tcr::Tcr`], [`sctlr::Sctlr`], the two
//!   translation table base registers in [`ttbr`] and the physical address
//!   range field of [`mmfr0::IdAa64Mmfr0`].
//!
//! The value types compile on every target so their encodings can be tested on
//! the host; the `asm` feature adds load/store implementations on the matching
//! architecture.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr3;
pub mod mair;
pub mod mmfr0;
pub mod sctlr;
pub mod tcr;
pub mod ttbr;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// The register access is privileged and requires ring 0 / EL1.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Writing translation registers changes how every following access is translated.
    unsafe fn store_unsafe(self);
}
