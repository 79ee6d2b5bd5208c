//! # Trace output
//!
//! Dumps the handoff once boot services are gone and only the debug sink is left.

use loader_core::Handoff;
use loader_protocol::boot::HandoffPage;
use loader_trace::debug_trace;

pub fn trace_handoff(page: &HandoffPage, jump: &Handoff) {
    let header = &page.header;
    debug_trace!("Handoff in UEFI Loader:\n");
    debug_trace!("   header at {:018x}", page.address());
    debug_trace!(", size = {}", header.size);
    debug_trace!(", loader type = {}", header.loader_type);
    debug_trace!(", bsp = {}\n", header.bspid);
    debug_trace!(" initrd ptr = {:018x}", header.initrd_ptr);
    debug_trace!(", initrd size = {}\n", header.initrd_size);
    debug_trace!("     FB ptr = {:018x}", header.fb_ptr);
    debug_trace!(", FB size = {}", header.fb_size);
    debug_trace!(", FB {}x{}", header.fb_width, header.fb_height);
    debug_trace!(", scanline = {}", header.fb_scanline);
    debug_trace!(", type = {}\n", header.fb_type);
    debug_trace!("       RSDP = {:018x}", header.arch.acpi_ptr());
    debug_trace!(", SMBIOS = {:018x}", header.arch.smbi_ptr());
    debug_trace!(", EFI = {:018x}\n", header.arch.efi_ptr());
    for entry in page.entries() {
        debug_trace!(
            "   mmap {:018x} +{:x} {:?}\n",
            entry.base(),
            entry.length(),
            entry.kind()
        );
    }
    debug_trace!(
        "      entry = {:018x}, stack top = {:018x}, CR3 = {}\n",
        jump.entry,
        jump.stack_top,
        jump.roots.low
    );
}
