use loader_protocol::memory::{
    BOOTBOOT_CORE, BOOTBOOT_ENV, BOOTBOOT_FB, BOOTBOOT_INFO, BOOTBOOT_STACK, CORE_WINDOW_PAGES,
    FB_WINDOW_SIZE, PAGE_SIZE,
};

const PAGE: u64 = PAGE_SIZE as u64;
use loader_vmem::{
    Aarch64TwoLevel, AddressSpace, BootLayout, FramePool, FramebufferMapping, MapAttributes,
    MemoryType, PageFrame, PageSize, PagingError, PagingScheme, PhysicalAddress, VirtualAddress,
    X86FourLevel,
};

const HANDOFF: u64 = 0x0010_0000;
const ENVIRONMENT: u64 = 0x0010_1000;
const KERNEL: u64 = 0x0020_0000;
const KERNEL_SIZE: u64 = 3 * PAGE + 10;

fn frames<S: PagingScheme>() -> Vec<PageFrame> {
    vec![PageFrame::zeroed(); S::POOL_FRAMES]
}

fn layout<'a>(framebuffer: Option<FramebufferMapping>, devices: &'a [std::ops::Range<u64>]) -> BootLayout<'a> {
    BootLayout {
        handoff: PhysicalAddress::new(HANDOFF),
        environment: PhysicalAddress::new(ENVIRONMENT),
        kernel: PhysicalAddress::new(KERNEL),
        kernel_size: KERNEL_SIZE,
        framebuffer,
        device_ranges: devices,
    }
}

fn phys<S: PagingScheme>(space: &AddressSpace<'_, S>, va: u64) -> Option<u64> {
    space.translate(VirtualAddress::new(va)).map(|t| t.phys.as_u64())
}

fn assert_core_window<S: PagingScheme>(space: &AddressSpace<'_, S>) {
    assert_eq!(phys(space, BOOTBOOT_INFO), Some(HANDOFF));
    assert_eq!(phys(space, BOOTBOOT_ENV + 0x10), Some(ENVIRONMENT + 0x10));
    for page in 0..4 {
        assert_eq!(
            phys(space, BOOTBOOT_CORE + page * PAGE),
            Some(KERNEL + page * PAGE)
        );
    }
    // Nothing past the last kernel page.
    assert_eq!(phys(space, BOOTBOOT_CORE + 4 * PAGE), None);

    let stack = space.stack().expect("stack page").as_u64();
    assert_eq!(phys(space, BOOTBOOT_STACK + 0xff8), Some(stack + 0xff8));
    assert!(space.table_region().contains(&stack));
}

#[test]
fn x86_address_space_covers_every_window() {
    let mut backing = frames::<X86FourLevel>();
    let fb = FramebufferMapping {
        base: PhysicalAddress::new(0x8000_0000),
        size: 1024 * 768 * 4,
    };
    let space = AddressSpace::<X86FourLevel>::build(FramePool::new(&mut backing), &layout(Some(fb), &[]))
        .expect("address space");

    assert_core_window(&space);

    // Identity map: page granular below 2 MiB, blocks up to 16 GiB.
    let low = space.translate(VirtualAddress::new(0x1234)).expect("identity");
    assert_eq!((low.phys.as_u64(), low.size), (0x1234, PageSize::Size4K));
    let high = space.translate(VirtualAddress::new((16 << 30) - 8)).expect("identity");
    assert_eq!(high.size, PageSize::Size2M);
    assert_eq!(phys(&space, 16 << 30), None);

    // The framebuffer is 2 MiB aligned, so blocks then pages for the tail.
    assert_eq!(phys(&space, BOOTBOOT_FB), Some(0x8000_0000));
    let tail = BOOTBOOT_FB + 1024 * 768 * 4 - 4;
    assert_eq!(phys(&space, tail), Some(0x8000_0000 + 1024 * 768 * 4 - 4));
    assert_eq!(phys(&space, BOOTBOOT_FB + 1024 * 768 * 4), None);
}

#[test]
fn x86_interrupt_controllers_are_device_memory() {
    let mut backing = frames::<X86FourLevel>();
    let devices = [0xFEE0_0000..0xFEE0_1000, 0xFEC0_0000..0xFEC0_1000];
    let space = AddressSpace::<X86FourLevel>::build(FramePool::new(&mut backing), &layout(None, &devices))
        .expect("address space");

    let lapic = space.translate(VirtualAddress::new(0xFEE0_00B0)).expect("identity");
    assert_eq!(lapic.phys.as_u64(), 0xFEE0_00B0);
    assert_eq!(lapic.attrs, MapAttributes::DEVICE);
    let ioapic = space.translate(VirtualAddress::new(0xFEC0_0010)).expect("identity");
    assert_eq!(ioapic.attrs, MapAttributes::DEVICE);

    let ram = space.translate(VirtualAddress::new(0x0100_0000)).expect("identity");
    assert_eq!(ram.attrs, MapAttributes::NORMAL);
}

#[test]
fn aarch64_address_space_marks_devices_and_splits_halves() {
    let mut backing = frames::<Aarch64TwoLevel>();
    let devices = [0x3f00_0000..0x4000_0000];
    let fb = FramebufferMapping {
        base: PhysicalAddress::new(0x3c10_0000),
        size: 800 * 600 * 4,
    };
    let space = AddressSpace::<Aarch64TwoLevel>::build(FramePool::new(&mut backing), &layout(Some(fb), &devices))
        .expect("address space");

    assert_core_window(&space);

    let uart = space.translate(VirtualAddress::new(0x3f20_1000)).expect("mmio");
    assert_eq!(uart.attrs.memory, MemoryType::Device);
    let ram = space.translate(VirtualAddress::new(0x0100_0000)).expect("ram");
    assert_eq!(ram.attrs, MapAttributes::NORMAL);
    assert_eq!(phys(&space, 1 << 30), None);

    // Unaligned to 2 MiB: page granular.
    let first = space.translate(VirtualAddress::new(BOOTBOOT_FB)).expect("fb");
    assert_eq!((first.phys.as_u64(), first.size), (0x3c10_0000, PageSize::Size4K));

    let roots = space.roots();
    assert_ne!(roots.low, roots.high);
}

#[test]
fn framebuffer_is_capped_at_its_window() {
    let mut backing = frames::<X86FourLevel>();
    let fb = FramebufferMapping {
        base: PhysicalAddress::new(0x1_0000_0000),
        size: FB_WINDOW_SIZE + 0x40_0000,
    };
    let space = AddressSpace::<X86FourLevel>::build(FramePool::new(&mut backing), &layout(Some(fb), &[]))
        .expect("address space");
    assert_eq!(
        phys(&space, BOOTBOOT_FB + FB_WINDOW_SIZE - 1),
        Some(0x1_0000_0000 + FB_WINDOW_SIZE - 1)
    );
    // The window ends where MMIO's region would begin in the kernel's view.
    assert_eq!(phys(&space, BOOTBOOT_FB + FB_WINDOW_SIZE), None);
}

#[test]
fn kernel_larger_than_window_is_rejected() {
    let mut backing = frames::<Aarch64TwoLevel>();
    let mut layout = layout(None, &[]);
    layout.kernel_size = (CORE_WINDOW_PAGES as u64 + 1) * PAGE;
    let result = AddressSpace::<Aarch64TwoLevel>::build(FramePool::new(&mut backing), &layout);
    assert_eq!(result.err(), Some(PagingError::KernelTooLarge(CORE_WINDOW_PAGES + 1)));
}

#[test]
fn small_pool_is_reported_as_exhausted() {
    let mut backing = vec![PageFrame::zeroed(); 4];
    let result = AddressSpace::<X86FourLevel>::build(FramePool::new(&mut backing), &layout(None, &[]));
    assert_eq!(result.err(), Some(PagingError::PoolExhausted));
}

#[test]
fn every_address_has_at_most_one_mapping() {
    let mut backing = frames::<X86FourLevel>();
    let mut space = AddressSpace::<X86FourLevel>::build(FramePool::new(&mut backing), &layout(None, &[]))
        .expect("address space");
    assert_eq!(
        space.map(
            VirtualAddress::new(BOOTBOOT_INFO),
            PhysicalAddress::new(0x5000),
            PageSize::Size4K,
            MapAttributes::NORMAL
        ),
        Err(PagingError::AlreadyMapped(BOOTBOOT_INFO))
    );
    assert_eq!(
        space.map_range(
            VirtualAddress::new(0x40_0000),
            PhysicalAddress::new(0x40_0000),
            0x1000,
            MapAttributes::NORMAL
        ),
        Err(PagingError::AlreadyMapped(0x40_0000))
    );
}

#[test]
fn activation_consumes_the_tables() {
    let mut backing = frames::<Aarch64TwoLevel>();
    let space = AddressSpace::<Aarch64TwoLevel>::build(FramePool::new(&mut backing), &layout(None, &[]))
        .expect("address space");
    assert_eq!(unsafe { space.activate() }, Err(PagingError::UnsupportedTarget));
}
