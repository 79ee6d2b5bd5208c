//! Leaving the firmware.
//!
//! UEFI only lets a loader exit boot services with the key of the most recent
//! memory map. Any allocation, including one made by the firmware itself,
//! invalidates the key, so the map is rebuilt and the exit retried a bounded
//! number of times. Platforms without resident firmware never call this.

use crate::error::{BootError, ConsistencyError, FirmwareError};
use crate::mmap::MemoryMapBuilder;

/// Attempts before a stale key is treated as fatal.
pub const EXIT_RETRY_BUDGET: usize = 3;

/// Identifies one snapshot of the firmware memory map.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MapKey(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExitError {
    #[error("memory map key is stale")]
    StaleKey,
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
}

/// The firmware services needed to hand over the machine.
pub trait FirmwareExit {
    /// Fills `map` from the current firmware memory map.
    ///
    /// # Errors
    /// The firmware failed to report its map.
    fn snapshot(&mut self, map: &mut MemoryMapBuilder) -> Result<MapKey, FirmwareError>;

    /// Terminates firmware services. On success `map` holds the final map.
    ///
    /// # Errors
    /// [`ExitError::StaleKey`] if the map changed since `key` was taken.
    fn exit(&mut self, key: MapKey, map: &mut MemoryMapBuilder) -> Result<(), ExitError>;
}

/// Snapshots the memory map and exits the firmware, retrying on stale keys.
///
/// Only the memory map is rebuilt between attempts; the address space
/// already covers everything the kernel needs regardless of the map.
///
/// # Errors
/// [`ConsistencyError::StaleMemoryMap`] once the budget is spent, or the
/// first firmware failure.
pub fn leave_firmware<F>(firmware: &mut F, map: &mut MemoryMapBuilder) -> Result<(), BootError>
where
    F: FirmwareExit + ?Sized,
{
    for attempt in 1..=EXIT_RETRY_BUDGET {
        map.clear();
        let key = firmware.snapshot(map)?;
        match firmware.exit(key, map) {
            Ok(()) => {
                log::debug!("Left firmware on attempt {attempt}");
                return Ok(());
            }
            Err(ExitError::StaleKey) => {
                log::warn!("Memory map key {key:?} went stale, rebuilding the map");
            }
            Err(ExitError::Firmware(e)) => return Err(e.into()),
        }
    }
    Err(ConsistencyError::StaleMemoryMap {
        attempts: EXIT_RETRY_BUDGET,
    }
    .into())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use loader_protocol::boot::MemoryKind;

    /// Firmware whose map changes `stale_exits` times before an exit succeeds.
    pub struct FakeFirmware {
        pub stale_exits: usize,
        pub snapshots: usize,
        pub exited: bool,
    }

    impl FakeFirmware {
        pub const fn new(stale_exits: usize) -> Self {
            Self {
                stale_exits,
                snapshots: 0,
                exited: false,
            }
        }
    }

    impl FirmwareExit for FakeFirmware {
        fn snapshot(&mut self, map: &mut MemoryMapBuilder) -> Result<MapKey, FirmwareError> {
            self.snapshots += 1;
            map.push(0, 0x9_F000, MemoryKind::Free);
            map.push(0x10_0000, 0x3FF0_0000, MemoryKind::Free);
            Ok(MapKey(self.snapshots as u64))
        }

        fn exit(&mut self, key: MapKey, _map: &mut MemoryMapBuilder) -> Result<(), ExitError> {
            if self.stale_exits > 0 {
                self.stale_exits -= 1;
                return Err(ExitError::StaleKey);
            }
            assert_eq!(key, MapKey(self.snapshots as u64));
            self.exited = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeFirmware;
    use super::*;

    #[test]
    fn stale_key_rebuilds_the_map_and_retries() {
        let mut firmware = FakeFirmware::new(2);
        let mut map = MemoryMapBuilder::new();
        leave_firmware(&mut firmware, &mut map).expect("third attempt succeeds");
        assert!(firmware.exited);
        assert_eq!(firmware.snapshots, 3);
        // Rebuilt, not accumulated.
        assert_eq!(map.regions().len(), 2);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut firmware = FakeFirmware::new(EXIT_RETRY_BUDGET);
        let mut map = MemoryMapBuilder::new();
        assert_eq!(
            leave_firmware(&mut firmware, &mut map),
            Err(BootError::Consistency(ConsistencyError::StaleMemoryMap {
                attempts: EXIT_RETRY_BUDGET
            }))
        );
        assert!(!firmware.exited);
    }

    #[test]
    fn firmware_failure_is_not_retried() {
        struct Broken;
        impl FirmwareExit for Broken {
            fn snapshot(&mut self, _: &mut MemoryMapBuilder) -> Result<MapKey, FirmwareError> {
                Ok(MapKey(0))
            }
            fn exit(&mut self, _: MapKey, _: &mut MemoryMapBuilder) -> Result<(), ExitError> {
                Err(FirmwareError::Service {
                    service: "ExitBootServices",
                    status: 2,
                }
                .into())
            }
        }
        let mut map = MemoryMapBuilder::new();
        assert!(matches!(
            leave_firmware(&mut Broken, &mut map),
            Err(BootError::Firmware(FirmwareError::Service { .. }))
        ));
    }
}
