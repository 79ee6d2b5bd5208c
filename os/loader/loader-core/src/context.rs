//! # Boot Context
//!
//! One value threads through the whole pipeline. It owns the handoff and
//! environment pages, every artifact an earlier stage produced, and the
//! current [`BootStage`]. Stage methods run only in order:
//!
//! ```text
//! Init → DeviceReady → VolumeResolved → RamdiskReady → ConfigParsed
//!      → KernelRecognized → MemoryMapBuilt → PagingBuilt → HandoffActivated
//! ```
//!
//! Any error moves the context to [`BootStage::Failed`], which is terminal:
//! every later stage method returns a [`ConsistencyError::StageOrder`].
//! Platforms route that to their single failure path.
//!
//! The framebuffer, clock and architecture pointers are not stages; the
//! platform may record them at any point before [`BootContext::finalize`].

use crate::arch::Architecture;
use crate::device::BlockDevice;
use crate::environment::{Environment, EnvironmentPage};
use crate::error::{BootError, ConsistencyError, VolumeError};
use crate::handoff::{self, FirmwareExit};
use crate::image::{self, ExecutableImage, ImageError};
use crate::inflate::gzip::GzipStream;
use crate::mmap::{MemoryMapBuilder, Span};
use crate::pages::PageSource;
use crate::volume::{self, VolumeHandle};
use crate::fs;
use core::ops::Range;
use loader_protocol::boot::{
    ArchInfo, BcdTimestamp, BootBoot, FramebufferType, HandoffPage, LoaderType, MemoryKind,
};
use loader_protocol::memory::{
    BOOTBOOT_CORE, BOOTBOOT_ENV, BOOTBOOT_FB, BOOTBOOT_INFO, BOOTBOOT_STACK, BOOTBOOT_STACK_TOP,
    CORE_WINDOW_PAGES, PAGE_SIZE, page_align_up,
};
use loader_vmem::{
    AddressSpace, BootLayout, FramePool, FramebufferMapping, PagingError, PagingScheme,
    PhysicalAddress, TranslationRoots, VirtualAddress,
};

const PAGE: u64 = PAGE_SIZE as u64;

/// Ramdisk path of the configuration when the volume has none.
pub const RAMDISK_CONFIG_PATH: &str = "sys/config";

/// Where the pipeline is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootStage {
    Init,
    DeviceReady,
    VolumeResolved,
    RamdiskReady { compressed: bool },
    ConfigParsed,
    KernelRecognized,
    MemoryMapBuilt,
    PagingBuilt,
    HandoffActivated,
    Failed(BootError),
}

impl BootStage {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::DeviceReady => "DeviceReady",
            Self::VolumeResolved => "VolumeResolved",
            Self::RamdiskReady { .. } => "RamdiskReady",
            Self::ConfigParsed => "ConfigParsed",
            Self::KernelRecognized => "KernelRecognized",
            Self::MemoryMapBuilt => "MemoryMapBuilt",
            Self::PagingBuilt => "PagingBuilt",
            Self::HandoffActivated => "HandoffActivated",
            Self::Failed(_) => "Failed",
        }
    }
}

/// A linear framebuffer set up by the platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    pub base: u64,
    pub size: u32,
    pub width: u32,
    pub height: u32,
    /// Bytes per line.
    pub scanline: u32,
    pub kind: FramebufferType,
}

/// What the platform needs to start the kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub entry: u64,
    /// Initial stack pointer; wraps to zero at the very top of the address space.
    pub stack_top: u64,
    pub roots: TranslationRoots,
}

/// The recognized kernel and the bytes mapped for it.
#[derive(Debug, Copy, Clone)]
pub struct Kernel<'m> {
    pub image: ExecutableImage,
    /// Starts at the segment, aligned to [`ExecutableImage::frame_alignment`],
    /// and at least `image.size` long.
    pub bytes: &'m [u8],
    pub staged: bool,
}

pub struct BootContext<'m> {
    arch: Architecture,
    stage: BootStage,
    handoff: &'m mut HandoffPage,
    environment: &'m mut EnvironmentPage,
    env: Environment,
    volume: Option<VolumeHandle>,
    ramdisk: &'m [u8],
    volume_config: Option<&'m [u8]>,
    kernel: Option<Kernel<'m>>,
    framebuffer: Option<Framebuffer>,
    mmap: MemoryMapBuilder,
}

impl<'m> BootContext<'m> {
    /// Starts a pipeline with cleared handoff and environment pages.
    #[must_use]
    pub fn new(
        arch: Architecture,
        loader: LoaderType,
        handoff: &'m mut HandoffPage,
        environment: &'m mut EnvironmentPage,
    ) -> Self {
        *handoff = HandoffPage::new();
        handoff.header.loader_type = loader as u8;
        environment.load(&[]);
        log::info!("Boot pipeline for {} starting", arch.name());
        Self {
            arch,
            stage: BootStage::Init,
            handoff,
            environment,
            env: Environment::default(),
            volume: None,
            ramdisk: &[],
            volume_config: None,
            kernel: None,
            framebuffer: None,
            mmap: MemoryMapBuilder::new(),
        }
    }

    #[must_use]
    pub const fn stage(&self) -> BootStage {
        self.stage
    }

    #[must_use]
    pub const fn arch(&self) -> Architecture {
        self.arch
    }

    #[must_use]
    pub const fn environment(&self) -> &Environment {
        &self.env
    }

    #[must_use]
    pub fn environment_text(&self) -> &[u8] {
        self.environment.text()
    }

    #[must_use]
    pub const fn volume(&self) -> Option<VolumeHandle> {
        self.volume
    }

    #[must_use]
    pub const fn ramdisk(&self) -> &'m [u8] {
        self.ramdisk
    }

    #[must_use]
    pub const fn kernel(&self) -> Option<&Kernel<'m>> {
        self.kernel.as_ref()
    }

    #[must_use]
    pub const fn memory_map(&self) -> &MemoryMapBuilder {
        &self.mmap
    }

    #[must_use]
    pub const fn header(&self) -> &BootBoot {
        &self.handoff.header
    }

    /// The handoff page as the kernel will see it once [`finalize`](Self::finalize) ran.
    #[must_use]
    pub const fn handoff_page(&self) -> &HandoffPage {
        self.handoff
    }

    /// Runs `body` if the context is in a stage `ready` accepts, and records
    /// the first failure.
    fn run<T>(
        &mut self,
        operation: &'static str,
        ready: fn(&BootStage) -> bool,
        body: impl FnOnce(&mut Self) -> Result<T, BootError>,
    ) -> Result<T, BootError> {
        let result = if ready(&self.stage) {
            body(self)
        } else {
            Err(ConsistencyError::StageOrder {
                operation,
                found: self.stage.name(),
            }
            .into())
        };
        if let Err(error) = &result
            && !matches!(self.stage, BootStage::Failed(_))
        {
            log::error!("{operation} failed in stage {}: {error}", self.stage.name());
            self.stage = BootStage::Failed(*error);
        }
        result
    }

    fn advance(&mut self, stage: BootStage) {
        log::info!("Boot stage {} -> {}", self.stage.name(), stage.name());
        self.stage = stage;
    }

    /// The platform has a block device or file service to load from.
    ///
    /// # Errors
    /// [`ConsistencyError::StageOrder`] unless called first.
    pub fn device_ready(&mut self) -> Result<(), BootError> {
        self.run("device_ready", |s| matches!(s, BootStage::Init), |ctx| {
            ctx.advance(BootStage::DeviceReady);
            Ok(())
        })
    }

    /// Loads the ramdisk and configuration from the GPT boot volume.
    ///
    /// # Errors
    /// See [`volume::resolve`].
    pub fn resolve_volume<D, P>(
        &mut self,
        device: &mut D,
        pages: &mut P,
    ) -> Result<VolumeHandle, BootError>
    where
        D: BlockDevice,
        P: PageSource<'m>,
    {
        self.run(
            "resolve_volume",
            |s| matches!(s, BootStage::DeviceReady),
            |ctx| {
                let resolved = volume::resolve(device, pages, ctx.arch)?;
                ctx.volume = Some(resolved.handle);
                ctx.ramdisk = resolved.ramdisk;
                ctx.volume_config = resolved.config;
                ctx.advance(BootStage::VolumeResolved);
                Ok(resolved.handle)
            },
        )
    }

    /// Uses a ramdisk and configuration the platform loaded by other means,
    /// such as a firmware file service.
    ///
    /// # Errors
    /// [`VolumeError::RamdiskNotFound`] for an empty ramdisk.
    pub fn use_files(&mut self, ramdisk: &'m [u8], config: Option<&'m [u8]>) -> Result<(), BootError> {
        self.run(
            "use_files",
            |s| matches!(s, BootStage::DeviceReady),
            |ctx| {
                if ramdisk.is_empty() {
                    return Err(VolumeError::RamdiskNotFound.into());
                }
                ctx.ramdisk = ramdisk;
                ctx.volume_config = config.filter(|c| !c.is_empty());
                ctx.advance(BootStage::VolumeResolved);
                Ok(())
            },
        )
    }

    /// Inflates a gzip compressed ramdisk into fresh pages and records the
    /// final ramdisk in the handoff header.
    ///
    /// # Errors
    /// Decode failures, exhausted pages, or [`ConsistencyError::InflateOverlap`]
    /// for a destination overlapping the source, the handoff structures or a
    /// [reserved](Self::reserve) range.
    pub fn prepare_ramdisk<P>(&mut self, pages: &mut P) -> Result<(), BootError>
    where
        P: PageSource<'m>,
    {
        self.run(
            "prepare_ramdisk",
            |s| matches!(s, BootStage::VolumeResolved),
            |ctx| {
                let compressed = GzipStream::is_gzip(ctx.ramdisk);
                if compressed {
                    let source = ctx.ramdisk;
                    let stream = GzipStream::parse(source)?;
                    log::debug!(
                        "Ramdisk is gzip, {} bytes declare {} uncompressed",
                        source.len(),
                        stream.declared_size()
                    );
                    let dest = pages.claim_bytes(stream.declared_size())?;
                    ctx.check_inflate_target(Span::of(source), Span::of(dest))?;
                    stream.inflate_into(dest)?;
                    ctx.mmap.release(Span::of(source))?;
                    ctx.ramdisk = dest;
                }
                if ctx.ramdisk.is_empty() {
                    return Err(VolumeError::RamdiskNotFound.into());
                }

                let header = &mut ctx.handoff.header;
                header.initrd_ptr = ctx.ramdisk.as_ptr() as u64;
                header.initrd_size = page_align_up(ctx.ramdisk.len() as u64);
                ctx.advance(BootStage::RamdiskReady { compressed });
                Ok(())
            },
        )
    }

    /// The inflate target must miss its source, the handoff structures and
    /// everything reserved so far.
    fn check_inflate_target(&self, source: Span, dest: Span) -> Result<(), ConsistencyError> {
        let handoff = Span::from_len(self.handoff.address(), PAGE);
        let environment = Span::from_len(self.environment.address(), PAGE);
        let reserved = self.mmap.reserved().iter().copied();
        match [source, handoff, environment].into_iter().chain(reserved).find(|live| dest.overlaps(live)) {
            Some(live) => Err(ConsistencyError::InflateOverlap {
                live: live.start,
                dest: dest.start,
            }),
            None => Ok(()),
        }
    }

    /// Copies the configuration into the environment page and parses it.
    /// The volume's `CONFIG` wins over `sys/config` in the ramdisk.
    ///
    /// # Errors
    /// [`ConsistencyError::StageOrder`] only.
    pub fn parse_config(&mut self) -> Result<(), BootError> {
        self.run(
            "parse_config",
            |s| matches!(s, BootStage::RamdiskReady { .. }),
            |ctx| {
                let config = ctx
                    .volume_config
                    .or_else(|| fs::locate(ctx.ramdisk, RAMDISK_CONFIG_PATH));
                match config {
                    Some(text) => {
                        ctx.environment.load(text);
                    }
                    None => log::info!("No configuration found, using defaults"),
                }
                ctx.env = Environment::parse(ctx.environment.text());
                log::info!(
                    "Kernel {}, screen {}x{}",
                    ctx.env.kernel_path(),
                    ctx.env.screen_width,
                    ctx.env.screen_height
                );
                ctx.advance(BootStage::ConfigParsed);
                Ok(())
            },
        )
    }

    /// Finds and recognizes the kernel: by path through the ramdisk archive readers,
    /// else by scanning for an executable header.
    ///
    /// A kernel that does not start on a page boundary, or whose mapped size
    /// runs past the end of the ramdisk, is copied to fresh pages.
    ///
    /// # Errors
    /// [`VolumeError::KernelNotFound`], an [`ImageError`](crate::image::ImageError),
    /// or a kernel too large for the core window.
    pub fn recognize_kernel<P>(&mut self, pages: &mut P) -> Result<ExecutableImage, BootError>
    where
        P: PageSource<'m>,
    {
        self.run(
            "recognize_kernel",
            |s| matches!(s, BootStage::ConfigParsed),
            |ctx| {
                let blob = fs::locate(ctx.ramdisk, ctx.env.kernel_path())
                    .or_else(|| {
                        log::warn!("{} not in ramdisk, scanning for an executable", ctx.env.kernel_path());
                        fs::scan_for_executable(ctx.ramdisk, ctx.arch)
                    })
                    .ok_or(VolumeError::KernelNotFound)?;
                let image = image::recognize(blob, ctx.arch)?;

                let pages_needed = usize::try_from(image.pages()).unwrap_or(usize::MAX);
                if pages_needed > CORE_WINDOW_PAGES {
                    return Err(PagingError::KernelTooLarge(pages_needed).into());
                }
                let size = usize::try_from(image.size).map_err(|_| PagingError::KernelTooLarge(pages_needed))?;
                let segment = usize::try_from(image.offset)
                    .ok()
                    .and_then(|offset| blob.get(offset..))
                    .ok_or(ImageError::Malformed)?;
                let align = image.frame_alignment();

                let in_place = (segment.as_ptr() as u64).is_multiple_of(align) && segment.len() >= size;
                let bytes: &'m [u8] = if in_place {
                    segment
                } else {
                    log::debug!("Staging kernel into {} fresh pages, aligned to {align:#x}", image.pages());
                    let slack = usize::try_from(align - PAGE).map_err(|_| ImageError::Alignment(align))?;
                    let claimed = pages.claim_bytes(size + slack)?;
                    let skip = (claimed.as_ptr() as u64).next_multiple_of(align) - claimed.as_ptr() as u64;
                    let staged = &mut claimed[usize::try_from(skip).unwrap_or(slack)..][..size];
                    let copied = segment.len().min(size);
                    staged[..copied].copy_from_slice(&segment[..copied]);
                    staged
                };
                ctx.kernel = Some(Kernel {
                    image,
                    bytes,
                    staged: !in_place,
                });
                ctx.advance(BootStage::KernelRecognized);
                Ok(image)
            },
        )
    }

    /// Keeps `span` out of the free memory reported to the kernel.
    /// Must be called before the memory map is built.
    ///
    /// # Errors
    /// [`ResourceError::TooManyReservations`](crate::ResourceError::TooManyReservations).
    pub fn reserve(&mut self, span: Span) -> Result<(), BootError> {
        self.mmap.reserve(span)?;
        Ok(())
    }

    fn reserve_live_structures(&mut self) -> Result<(), BootError> {
        for span in self.live_structures().into_iter().flatten() {
            self.mmap.reserve(span)?;
        }
        Ok(())
    }

    /// Handoff page, environment page, ramdisk, and kernel bytes.
    fn live_structures(&self) -> [Option<Span>; 4] {
        [
            Some(Span::from_len(self.handoff.address(), PAGE)),
            Some(Span::from_len(self.environment.address(), PAGE)),
            Some(Span::of(self.ramdisk)),
            self.kernel.map(|k| Span::of(k.bytes)),
        ]
    }

    /// Builds the memory map from platform knowledge: `(base, length, kind)` in any order.
    ///
    /// # Errors
    /// [`ResourceError::TooManyReservations`](crate::ResourceError::TooManyReservations).
    pub fn build_memory_map<I>(&mut self, regions: I) -> Result<usize, BootError>
    where
        I: IntoIterator<Item = (u64, u64, MemoryKind)>,
    {
        self.run(
            "build_memory_map",
            |s| matches!(s, BootStage::KernelRecognized),
            |ctx| {
                ctx.reserve_live_structures()?;
                ctx.mmap.clear();
                for (base, length, kind) in regions {
                    ctx.mmap.push(base, length, kind);
                }
                ctx.advance(BootStage::MemoryMapBuilt);
                Ok(ctx.mmap.regions().len())
            },
        )
    }

    /// Builds the memory map from a firmware snapshot.
    ///
    /// # Errors
    /// Firmware failures, or [`ResourceError::TooManyReservations`](crate::ResourceError::TooManyReservations).
    pub fn snapshot_memory_map<F>(&mut self, firmware: &mut F) -> Result<usize, BootError>
    where
        F: FirmwareExit + ?Sized,
    {
        self.run(
            "snapshot_memory_map",
            |s| matches!(s, BootStage::KernelRecognized),
            |ctx| {
                ctx.reserve_live_structures()?;
                ctx.mmap.clear();
                firmware.snapshot(&mut ctx.mmap)?;
                ctx.advance(BootStage::MemoryMapBuilt);
                Ok(ctx.mmap.regions().len())
            },
        )
    }

    pub const fn set_framebuffer(&mut self, fb: Framebuffer) {
        let header = &mut self.handoff.header;
        header.fb_ptr = BOOTBOOT_FB;
        header.fb_size = fb.size;
        header.fb_width = fb.width;
        header.fb_height = fb.height;
        header.fb_scanline = fb.scanline;
        header.fb_type = fb.kind as u16;
        self.framebuffer = Some(fb);
    }

    pub const fn set_datetime(&mut self, time: &BcdTimestamp, timezone_minutes: i16) {
        self.handoff.header.datetime = time.to_bcd();
        self.handoff.header.set_timezone(timezone_minutes);
    }

    pub const fn set_bsp_id(&mut self, id: u32) {
        self.handoff.header.bspid = id;
    }

    pub const fn arch_info_mut(&mut self) -> &mut ArchInfo {
        &mut self.handoff.header.arch
    }

    /// Builds the kernel's address space in `pool`.
    ///
    /// The pool's frames must have been [reserved](Self::reserve) before the
    /// memory map was built; [`finalize`](Self::finalize) checks that.
    ///
    /// # Errors
    /// Any [`PagingError`].
    pub fn build_address_space<'p, S>(
        &mut self,
        pool: FramePool<'p>,
        device_ranges: &[Range<u64>],
    ) -> Result<AddressSpace<'p, S>, BootError>
    where
        S: PagingScheme,
    {
        self.run(
            "build_address_space",
            |s| matches!(s, BootStage::MemoryMapBuilt),
            |ctx| {
                let kernel = ctx.kernel.ok_or(VolumeError::KernelNotFound)?;
                let layout = BootLayout {
                    handoff: PhysicalAddress::new(ctx.handoff.address()),
                    environment: PhysicalAddress::new(ctx.environment.address()),
                    kernel: PhysicalAddress::from_ptr(kernel.bytes.as_ptr()),
                    kernel_size: kernel.image.size,
                    framebuffer: ctx.framebuffer.map(|fb| FramebufferMapping {
                        base: PhysicalAddress::new(fb.base),
                        size: u64::from(fb.size),
                    }),
                    device_ranges,
                };
                let space = AddressSpace::<S>::build(pool, &layout)?;
                ctx.advance(BootStage::PagingBuilt);
                Ok(space)
            },
        )
    }

    /// Exits the firmware, rebuilding the memory map on stale keys.
    ///
    /// # Errors
    /// See [`handoff::leave_firmware`].
    pub fn leave_firmware<F>(&mut self, firmware: &mut F) -> Result<(), BootError>
    where
        F: FirmwareExit + ?Sized,
    {
        self.run(
            "leave_firmware",
            |s| matches!(s, BootStage::PagingBuilt),
            |ctx| handoff::leave_firmware(firmware, &mut ctx.mmap),
        )
    }

    /// Checks the address space covers everything the kernel needs, writes
    /// the memory map into the handoff page and returns where to jump.
    ///
    /// Activating `space` and jumping is left to the platform.
    ///
    /// # Errors
    /// [`ConsistencyError::Unmapped`] or [`ConsistencyError::LiveRangeFree`].
    pub fn finalize<S>(&mut self, space: &AddressSpace<'_, S>) -> Result<Handoff, BootError>
    where
        S: PagingScheme,
    {
        self.run(
            "finalize",
            |s| matches!(s, BootStage::PagingBuilt),
            |ctx| {
                let kernel = ctx.kernel.ok_or(VolumeError::KernelNotFound)?;
                ctx.verify_mappings(space, &kernel)?;

                let tables = space.table_region();
                let live = ctx.live_structures().into_iter().flatten();
                for span in live.chain([Span::new(tables.start, tables.end)]) {
                    if let Some(free) = ctx
                        .mmap
                        .regions()
                        .iter()
                        .find(|r| r.kind.is_free() && r.span.overlaps(&span))
                    {
                        let at = span.start.max(free.span.start);
                        return Err(ConsistencyError::LiveRangeFree(at).into());
                    }
                }

                ctx.mmap.write_into(ctx.handoff);
                let handoff = Handoff {
                    entry: kernel.image.entry,
                    stack_top: BOOTBOOT_STACK_TOP,
                    roots: space.roots(),
                };
                ctx.advance(BootStage::HandoffActivated);
                Ok(handoff)
            },
        )
    }

    fn verify_mappings<S: PagingScheme>(
        &self,
        space: &AddressSpace<'_, S>,
        kernel: &Kernel<'_>,
    ) -> Result<(), ConsistencyError> {
        let expect = |va: u64, pa: Option<u64>| {
            let found = space.translate(VirtualAddress::new(va)).map(|t| t.phys.as_u64());
            match (found, pa) {
                (Some(found), Some(pa)) if found == pa => Ok(()),
                (Some(_), None) => Ok(()),
                _ => Err(ConsistencyError::Unmapped(va)),
            }
        };

        expect(BOOTBOOT_INFO, Some(self.handoff.address()))?;
        expect(BOOTBOOT_ENV, Some(self.environment.address()))?;
        let kernel_base = kernel.bytes.as_ptr() as u64;
        for page in 0..kernel.image.pages() {
            expect(BOOTBOOT_CORE + page * PAGE, Some(kernel_base + page * PAGE))?;
        }
        expect(kernel.image.entry, None)?;
        expect(BOOTBOOT_STACK, space.stack().map(PhysicalAddress::as_u64))?;
        if let Some(fb) = self.framebuffer {
            expect(BOOTBOOT_FB, Some(fb.base))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_support::ustar;
    use crate::image::test_support::elf;
    use crate::inflate::test_vectors::FIXED;
    use crate::pages::BumpPages;

    const ENTRY: u64 = BOOTBOOT_CORE + 0x100;

    #[test]
    fn stages_run_in_order_and_failure_is_terminal() {
        let mut handoff = Box::new(HandoffPage::new());
        let mut environment = Box::new(EnvironmentPage::new());
        let mut ctx = BootContext::new(
            Architecture::X86_64,
            LoaderType::Uefi,
            &mut handoff,
            &mut environment,
        );
        assert_eq!(ctx.header().loader_type, LoaderType::Uefi as u8);

        let out_of_order = ctx.parse_config();
        assert_eq!(
            out_of_order,
            Err(BootError::Consistency(ConsistencyError::StageOrder {
                operation: "parse_config",
                found: "Init",
            }))
        );
        assert_eq!(ctx.stage(), BootStage::Failed(out_of_order.unwrap_err()));

        assert!(ctx.device_ready().is_err());
        assert_eq!(ctx.stage().name(), "Failed");
    }

    #[test]
    fn empty_ramdisk_fails_the_pipeline() {
        let mut handoff = Box::new(HandoffPage::new());
        let mut environment = Box::new(EnvironmentPage::new());
        let mut ctx = BootContext::new(
            Architecture::X86_64,
            LoaderType::Uefi,
            &mut handoff,
            &mut environment,
        );
        ctx.device_ready().expect("first stage");
        assert_eq!(
            ctx.use_files(&[], None),
            Err(BootError::Volume(VolumeError::RamdiskNotFound))
        );
        assert_eq!(
            ctx.stage(),
            BootStage::Failed(BootError::Volume(VolumeError::RamdiskNotFound))
        );
    }

    #[test]
    fn unaligned_kernel_is_staged() {
        let kernel = elf(62, ENTRY, 0x1800);
        let archive = ustar(&[("boot/kernel", &kernel)]);

        let mut arena = vec![0u8; 32 * 4096];
        let mut pages = BumpPages::new(&mut arena);
        let disk = pages.claim_bytes(archive.len() + 16).expect("room");
        disk[16..].copy_from_slice(&archive);
        let ramdisk: &[u8] = &disk[16..];

        let mut handoff = Box::new(HandoffPage::new());
        let mut environment = Box::new(EnvironmentPage::new());
        let mut ctx = BootContext::new(
            Architecture::X86_64,
            LoaderType::Uefi,
            &mut handoff,
            &mut environment,
        );
        ctx.device_ready().expect("stage");
        ctx.use_files(ramdisk, Some(b"kernel=boot/kernel\nfoo=bar\n")).expect("stage");
        ctx.prepare_ramdisk(&mut pages).expect("stage");
        assert_eq!(ctx.stage(), BootStage::RamdiskReady { compressed: false });
        ctx.parse_config().expect("stage");
        assert_eq!(ctx.environment_text(), b"kernel=boot/kernel\nfoo=bar\n");

        let image = ctx.recognize_kernel(&mut pages).expect("stage");
        assert_eq!(image.entry, ENTRY);
        let kernel = ctx.kernel().expect("recognized");
        assert!(kernel.staged);
        assert_eq!(kernel.bytes.as_ptr() as usize % 4096, 0);
        assert_eq!(kernel.bytes.len(), 0x2000);
        assert_eq!(&kernel.bytes[..4], b"\x7fELF");
        assert_eq!(ctx.header().initrd_size % 4096, 0);
    }

    #[test]
    fn staging_honors_a_segment_alignment_above_a_page() {
        const ALIGN: usize = 0x4000;
        let mut kernel = elf(62, ENTRY, 0x2000);
        kernel[64 + 48..64 + 56].copy_from_slice(&(ALIGN as u64).to_le_bytes());

        let mut arena = vec![0u8; 64 * 4096];
        let mut pages = BumpPages::new(&mut arena);
        let area = pages.claim_bytes(ALIGN + kernel.len()).expect("room");
        let skip = (0x1000 + ALIGN - area.as_ptr() as usize % ALIGN) % ALIGN;
        area[skip..skip + kernel.len()].copy_from_slice(&kernel);
        let ramdisk: &[u8] = &area[skip..skip + kernel.len()];
        assert_eq!(ramdisk.as_ptr() as usize % ALIGN, 0x1000);

        let mut handoff = Box::new(HandoffPage::new());
        let mut environment = Box::new(EnvironmentPage::new());
        let mut ctx = BootContext::new(
            Architecture::X86_64,
            LoaderType::Uefi,
            &mut handoff,
            &mut environment,
        );
        ctx.device_ready().expect("stage");
        ctx.use_files(ramdisk, None).expect("stage");
        ctx.prepare_ramdisk(&mut pages).expect("stage");
        ctx.parse_config().expect("stage");
        let image = ctx.recognize_kernel(&mut pages).expect("found by scanning");
        assert_eq!(image.alignment, ALIGN as u64);

        let kernel = ctx.kernel().expect("recognized");
        assert!(kernel.staged);
        assert_eq!(kernel.bytes.as_ptr() as usize % ALIGN, 0);
        assert_eq!(kernel.bytes.len(), 0x2000);
        assert_eq!(&kernel.bytes[..4], b"\x7fELF");
    }

    fn gzip_member() -> Vec<u8> {
        let mut blob = vec![0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 0, 3];
        blob.extend_from_slice(&FIXED);
        blob.extend_from_slice(&0u32.to_le_bytes());
        blob.extend_from_slice(&18u32.to_le_bytes());
        blob
    }

    #[test]
    fn gzip_ramdisk_is_inflated_into_fresh_pages() {
        let blob = gzip_member();
        let mut arena = vec![0u8; 8 * 4096];
        let mut pages = BumpPages::new(&mut arena);
        let disk = pages.claim_bytes(blob.len()).expect("room");
        disk.copy_from_slice(&blob);
        let disk: &[u8] = disk;

        let mut handoff = Box::new(HandoffPage::new());
        let mut environment = Box::new(EnvironmentPage::new());
        let mut ctx = BootContext::new(
            Architecture::X86_64,
            LoaderType::Uefi,
            &mut handoff,
            &mut environment,
        );
        ctx.device_ready().expect("stage");
        ctx.use_files(disk, None).expect("stage");
        ctx.prepare_ramdisk(&mut pages).expect("stage");
        assert_eq!(ctx.stage(), BootStage::RamdiskReady { compressed: true });
        assert_eq!(ctx.ramdisk(), b"abcabcabcabcabcabc");
        assert_eq!(ctx.header().initrd_size, 4096);
    }

    #[test]
    fn inflating_into_a_reserved_range_is_a_consistency_error() {
        let blob = gzip_member();
        let mut arena = vec![0u8; 8 * 4096];
        let mut pages = BumpPages::new(&mut arena);
        let disk = pages.claim_bytes(blob.len()).expect("room");
        disk.copy_from_slice(&blob);
        let disk: &[u8] = disk;
        // The next claim lands on the page right after the compressed ramdisk.
        let next_page = disk.as_ptr() as u64 + 4096;

        let mut handoff = Box::new(HandoffPage::new());
        let mut environment = Box::new(EnvironmentPage::new());
        let mut ctx = BootContext::new(
            Architecture::X86_64,
            LoaderType::Uefi,
            &mut handoff,
            &mut environment,
        );
        ctx.reserve(Span::from_len(next_page, 2 * 4096)).expect("room");
        ctx.device_ready().expect("stage");
        ctx.use_files(disk, None).expect("stage");

        let expected = BootError::Consistency(ConsistencyError::InflateOverlap {
            live: next_page,
            dest: next_page,
        });
        assert_eq!(ctx.prepare_ramdisk(&mut pages), Err(expected));
        assert_eq!(ctx.stage(), BootStage::Failed(expected));
    }

    #[test]
    fn bare_kernel_ramdisk_is_used_in_place() {
        let kernel = elf(183, ENTRY, 0x3000);
        let mut arena = vec![0u8; 16 * 4096];
        let mut pages = BumpPages::new(&mut arena);
        let disk = pages.claim_bytes(kernel.len()).expect("room");
        disk.copy_from_slice(&kernel);
        let ramdisk: &[u8] = disk;

        let mut handoff = Box::new(HandoffPage::new());
        let mut environment = Box::new(EnvironmentPage::new());
        let mut ctx = BootContext::new(
            Architecture::Aarch64,
            LoaderType::RaspberryPi,
            &mut handoff,
            &mut environment,
        );
        ctx.device_ready().expect("stage");
        ctx.use_files(ramdisk, None).expect("stage");
        ctx.prepare_ramdisk(&mut pages).expect("stage");
        ctx.parse_config().expect("stage");
        assert_eq!(ctx.environment().kernel_path(), "sys/core");
        ctx.recognize_kernel(&mut pages).expect("found by scanning");

        let kernel = ctx.kernel().expect("recognized");
        assert!(!kernel.staged);
        assert_eq!(kernel.bytes.as_ptr(), ramdisk.as_ptr());

        let window = (ramdisk.as_ptr() as u64 & !0xF_FFFF).saturating_sub(0x10_0000);
        let regions = [(window, 0x40_0000, MemoryKind::Free)];
        ctx.build_memory_map(regions).expect("stage");
        let ramdisk_span = Span::of(ramdisk);
        assert!(ctx.memory_map().covers(ramdisk_span, MemoryKind::Reserved));
    }
}
