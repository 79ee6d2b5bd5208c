//! # Memory-Mapped I/O
//!
//! Typed, volatile access to device registers at fixed physical addresses. The
//! loader runs identity mapped (or with translation off), so a physical
//! register address is used directly as a pointer.
//!
//! Waiting on hardware is always bounded: [`MmioRegion::poll32`] re-reads a
//! register up to a fixed number of times and reports whether the condition
//! was met, leaving the timeout policy to the caller.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod barrier;
mod region;

pub use region::MmioRegion;
