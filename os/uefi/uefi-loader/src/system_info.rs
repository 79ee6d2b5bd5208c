//! # Firmware Facts for the Handoff Header
//!
//! ACPI and SMBIOS entry points from the configuration table, the system
//! table itself, the wall clock, and the boot processor's APIC id.

use loader_core::BootContext;
use loader_protocol::boot::BcdTimestamp;
use uefi::table::cfg::{ACPI_GUID, ACPI2_GUID, SMBIOS_GUID, SMBIOS3_GUID};
use uefi::{Guid, runtime, system};

/// Physical address of the first configuration table entry matching one of
/// `guids`, in order of preference. Zero if absent.
fn config_table_address(guids: &[Guid]) -> u64 {
    system::with_config_table(|table| {
        guids
            .iter()
            .find_map(|guid| table.iter().find(|entry| entry.guid == *guid))
            .map_or(0, |entry| entry.address as usize as u64)
    })
}

pub fn record(ctx: &mut BootContext<'_>) {
    let acpi = config_table_address(&[ACPI2_GUID, ACPI_GUID]);
    let smbios = config_table_address(&[SMBIOS3_GUID, SMBIOS_GUID]);
    let efi = uefi::table::system_table_raw().map_or(0, |st| st.as_ptr() as u64);
    log::debug!("RSDP at {acpi:#x}, SMBIOS at {smbios:#x}, system table at {efi:#x}");

    let arch = ctx.arch_info_mut();
    arch.set_acpi_ptr(acpi);
    arch.set_smbi_ptr(smbios);
    arch.set_efi_ptr(efi);

    match runtime::get_time() {
        Ok(time) => {
            let timestamp = BcdTimestamp {
                year: time.year(),
                month: time.month(),
                day: time.day(),
                hour: time.hour(),
                minute: time.minute(),
                second: time.second(),
                daylight: time.daylight().bits(),
            };
            ctx.set_datetime(&timestamp, time.time_zone().unwrap_or(0));
        }
        Err(e) => log::warn!("GetTime failed: {:?}", e.status()),
    }

    ctx.set_bsp_id(bsp_apic_id());
}

#[cfg(target_arch = "x86_64")]
fn bsp_apic_id() -> u32 {
    // CPUID leaf 1: initial APIC id in EBX[31:24].
    #[allow(unused_unsafe)]
    let leaf = unsafe { core::arch::x86_64::__cpuid(1) };
    leaf.ebx >> 24
}

#[cfg(not(target_arch = "x86_64"))]
const fn bsp_apic_id() -> u32 {
    0
}
