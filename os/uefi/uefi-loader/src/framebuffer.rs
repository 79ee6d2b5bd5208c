//! # GOP for the Kernel

use loader_core::Framebuffer;
use loader_protocol::boot::FramebufferType;
use uefi::boot::{self, ScopedProtocol};
use uefi::proto::console::gop::{GraphicsOutput, Mode, ModeInfo, PixelFormat};

/// Switches to the smallest RGB or BGR mode at least `width` x `height` and
/// describes its framebuffer. Keeps the current mode if none is large enough.
///
/// `None` if there is no usable Graphics Output Protocol; the kernel then
/// boots without a framebuffer.
pub fn select(width: u32, height: u32) -> Option<Framebuffer> {
    let mut gop = match open_gop() {
        Ok(gop) => gop,
        Err(e) => {
            log::warn!("No Graphics Output Protocol: {:?}", e.status());
            return None;
        }
    };

    if let Some(mode) = smallest_mode_covering(&gop, width, height) {
        let (w, h) = mode.info().resolution();
        if (w, h) != gop.current_mode_info().resolution()
            && let Err(e) = gop.set_mode(&mode)
        {
            log::warn!("Failed to switch to {w}x{h}: {:?}", e.status());
        }
    } else {
        log::warn!("No RGB/BGR mode covers {width}x{height}, keeping the current one");
    }

    let info = gop.current_mode_info();
    let Some(kind) = framebuffer_type(&info) else {
        log::warn!("GOP mode has no linear framebuffer");
        return None;
    };
    let (w, h) = info.resolution();
    let mut fb = gop.frame_buffer();
    let framebuffer = Framebuffer {
        base: fb.as_mut_ptr() as u64,
        size: u32::try_from(fb.size()).ok()?,
        width: u32::try_from(w).ok()?,
        height: u32::try_from(h).ok()?,
        scanline: u32::try_from(info.stride() * 4).ok()?,
        kind,
    };
    log::info!(
        "Screen {}x{}, scanline {}, framebuffer at {:#x}, {:?}",
        framebuffer.width,
        framebuffer.height,
        framebuffer.scanline,
        framebuffer.base,
        framebuffer.kind
    );
    Some(framebuffer)
}

fn smallest_mode_covering(
    gop: &ScopedProtocol<GraphicsOutput>,
    width: u32,
    height: u32,
) -> Option<Mode> {
    gop.modes()
        .filter(|mode| matches!(mode.info().pixel_format(), PixelFormat::Rgb | PixelFormat::Bgr))
        .filter(|mode| {
            let (w, h) = mode.info().resolution();
            w >= width as usize && h >= height as usize
        })
        .min_by_key(|mode| {
            let (w, h) = mode.info().resolution();
            w * h
        })
}

/// Byte order of a pixel in memory, named from the most significant byte.
fn framebuffer_type(info: &ModeInfo) -> Option<FramebufferType> {
    match info.pixel_format() {
        PixelFormat::Bgr => Some(FramebufferType::Argb),
        PixelFormat::Rgb => Some(FramebufferType::Abgr),
        PixelFormat::Bitmask => {
            let mask = info.pixel_bitmask()?;
            Some(if mask.blue == 0 {
                FramebufferType::Argb
            } else if mask.red == 0 {
                FramebufferType::Abgr
            } else if mask.blue == 0xFF00 {
                FramebufferType::Rgba
            } else {
                FramebufferType::Bgra
            })
        }
        PixelFormat::BltOnly => None,
    }
}

fn open_gop() -> uefi::Result<ScopedProtocol<GraphicsOutput>> {
    let handle = boot::get_handle_for_protocol::<GraphicsOutput>()?;
    boot::open_protocol_exclusive::<GraphicsOutput>(handle)
}
