//! # VideoCore Mailbox
//!
//! The ARM cores ask the VideoCore firmware for memory sizes and a
//! framebuffer through property messages: a 16-byte aligned word buffer whose
//! address is posted to the property channel. The firmware rewrites the buffer
//! in place and posts the same address back.
//!
//! ```text
//! word 0      total size in bytes
//! word 1      request code (0), response code on return
//! word 2..    tags: id, value buffer bytes, request/response length, values...
//! last        end tag (0)
//! ```
//!
//! Every register wait is bounded; a silent VideoCore is an error, not a hang.

use crate::board::BUS_ADDRESS_MASK;
use core::ops::Range;
use loader_core::Framebuffer;
use loader_mmio::MmioRegion;
use loader_mmio::barrier::dsb;
use loader_protocol::boot::FramebufferType;
use loader_protocol::memory::PAGE_SIZE;

const READ: usize = 0x00;
const STATUS: usize = 0x18;
const WRITE: usize = 0x20;

const STATUS_FULL: u32 = 0x8000_0000;
const STATUS_EMPTY: u32 = 0x4000_0000;

pub const CHANNEL_PROPERTY: u8 = 8;

const REQUEST: u32 = 0;
const RESPONSE_SUCCESS: u32 = 0x8000_0000;
const END_TAG: u32 = 0;

const TAG_GET_ARM_MEMORY: u32 = 0x0001_0005;
const TAG_ALLOCATE_BUFFER: u32 = 0x0004_0001;
const TAG_GET_PITCH: u32 = 0x0004_0008;
const TAG_SET_PHYSICAL_SIZE: u32 = 0x0004_8003;
const TAG_SET_VIRTUAL_SIZE: u32 = 0x0004_8004;
const TAG_SET_DEPTH: u32 = 0x0004_8005;
const TAG_SET_VIRTUAL_OFFSET: u32 = 0x0004_8009;

/// Only 32 bits per pixel are handed to the kernel.
const DEPTH: u32 = 32;

/// Status register reads per wait.
const POLL_BUDGET: usize = 1_000_000;

/// Replies for other channels that are skipped before giving up.
const FOREIGN_REPLY_BUDGET: usize = 16;

pub const PROPERTY_WORDS: usize = 36;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox did not answer in time")]
    Timeout,
    #[error("property buffer at {0:#x} is not addressable by the VideoCore")]
    Unaddressable(u64),
    #[error("property message exceeds {PROPERTY_WORDS} words")]
    TooLong,
    #[error("VideoCore rejected the request with response code {0:#x}")]
    Rejected(u32),
    #[error("VideoCore answered without a usable {0}")]
    Incomplete(&'static str),
}

/// A property message under construction or as answered.
#[repr(C, align(16))]
pub struct PropertyBuffer {
    words: [u32; PROPERTY_WORDS],
    len: usize,
}

impl Default for PropertyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; PROPERTY_WORDS],
            len: 0,
        }
    }

    fn begin(&mut self) {
        self.words.fill(0);
        self.len = 2;
    }

    /// Appends a tag and returns the index of its first value word.
    fn tag(&mut self, id: u32, request: &[u32], response_words: usize) -> Result<usize, MailboxError> {
        let value_words = request.len().max(response_words);
        let at = self.len + 3;
        if at + value_words + 1 > PROPERTY_WORDS {
            return Err(MailboxError::TooLong);
        }
        self.words[self.len] = id;
        self.words[self.len + 1] = word_bytes(value_words);
        self.words[self.len + 2] = word_bytes(request.len());
        self.words[at..at + request.len()].copy_from_slice(request);
        self.len = at + value_words;
        Ok(at)
    }

    fn finish(&mut self) {
        self.words[self.len] = END_TAG;
        self.len += 1;
        self.words[0] = word_bytes(self.len);
        self.words[1] = REQUEST;
    }

    /// The words of the message, header and end tag included.
    #[must_use]
    pub fn message(&self) -> &[u32] {
        &self.words[..self.len]
    }

    fn response_code(&self) -> u32 {
        self.words[1]
    }

    /// The length word of the tag whose values start at `value`.
    fn tag_status(&self, value: usize) -> u32 {
        self.words[value - 1]
    }

    fn value(&self, at: usize) -> u32 {
        self.words[at]
    }

    /// Re-reads the buffer after the VideoCore wrote it behind our back.
    fn reload(&mut self) {
        for word in &mut self.words[..self.len] {
            // SAFETY: plain reads of our own, initialized buffer.
            *word = unsafe { core::ptr::read_volatile(word) };
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn word_bytes(words: usize) -> u32 {
    (words * 4) as u32
}

/// Value indices of the framebuffer request.
struct FramebufferTags {
    physical: usize,
    depth: usize,
    buffer: usize,
    pitch: usize,
}

/// Encodes the framebuffer request for a `width` x `height`, 32 bpp screen.
fn encode_framebuffer(buf: &mut PropertyBuffer, width: u32, height: u32) -> Result<FramebufferTags, MailboxError> {
    buf.begin();
    let physical = buf.tag(TAG_SET_PHYSICAL_SIZE, &[width, height], 2)?;
    buf.tag(TAG_SET_VIRTUAL_SIZE, &[width, height], 2)?;
    buf.tag(TAG_SET_VIRTUAL_OFFSET, &[0, 0], 2)?;
    let depth = buf.tag(TAG_SET_DEPTH, &[DEPTH], 1)?;
    #[allow(clippy::cast_possible_truncation)]
    let buffer = buf.tag(TAG_ALLOCATE_BUFFER, &[PAGE_SIZE as u32], 2)?;
    let pitch = buf.tag(TAG_GET_PITCH, &[], 1)?;
    buf.finish();
    Ok(FramebufferTags {
        physical,
        depth,
        buffer,
        pitch,
    })
}

fn decode_framebuffer(buf: &PropertyBuffer, tags: &FramebufferTags) -> Result<Framebuffer, MailboxError> {
    if buf.response_code() != RESPONSE_SUCCESS {
        return Err(MailboxError::Rejected(buf.response_code()));
    }
    if buf.value(tags.depth) != DEPTH {
        return Err(MailboxError::Incomplete("32 bpp mode"));
    }
    if buf.tag_status(tags.buffer) != RESPONSE_SUCCESS | 8 || buf.value(tags.buffer) == 0 {
        return Err(MailboxError::Incomplete("framebuffer"));
    }
    let pitch = buf.value(tags.pitch);
    if pitch == 0 {
        return Err(MailboxError::Incomplete("pitch"));
    }
    Ok(Framebuffer {
        base: u64::from(buf.value(tags.buffer) & BUS_ADDRESS_MASK),
        size: buf.value(tags.buffer + 1),
        width: buf.value(tags.physical),
        height: buf.value(tags.physical + 1),
        scanline: pitch,
        kind: FramebufferType::Argb,
    })
}

fn encode_arm_memory(buf: &mut PropertyBuffer) -> Result<usize, MailboxError> {
    buf.begin();
    let at = buf.tag(TAG_GET_ARM_MEMORY, &[], 2)?;
    buf.finish();
    Ok(at)
}

fn decode_arm_memory(buf: &PropertyBuffer, at: usize) -> Result<Range<u64>, MailboxError> {
    if buf.response_code() != RESPONSE_SUCCESS {
        return Err(MailboxError::Rejected(buf.response_code()));
    }
    let base = u64::from(buf.value(at));
    let size = u64::from(buf.value(at + 1));
    if size == 0 {
        return Err(MailboxError::Incomplete("memory size"));
    }
    Ok(base..base + size)
}

/// What the loader needs from the VideoCore firmware.
pub trait VideoCore {
    /// The RAM owned by the ARM cores; the rest up to the peripherals belongs to the GPU.
    ///
    /// # Errors
    /// Any [`MailboxError`].
    fn arm_memory(&mut self) -> Result<Range<u64>, MailboxError>;

    /// Sets up a 32 bpp linear framebuffer of at least `width` x `height`.
    ///
    /// # Errors
    /// Any [`MailboxError`].
    fn allocate_framebuffer(&mut self, width: u32, height: u32) -> Result<Framebuffer, MailboxError>;
}

pub struct Mailbox {
    regs: MmioRegion,
    buffer: PropertyBuffer,
}

impl Mailbox {
    #[must_use]
    pub const fn new(regs: MmioRegion) -> Self {
        Self {
            regs,
            buffer: PropertyBuffer::new(),
        }
    }

    /// Sends the buffered message on `channel` and waits for the answer.
    fn call(&mut self, channel: u8) -> Result<(), MailboxError> {
        let address = self.buffer.words.as_ptr() as u64;
        let message = u32::try_from(address)
            .ok()
            .filter(|a| a & 0xF == 0)
            .ok_or(MailboxError::Unaddressable(address))?
            | u32::from(channel & 0xF);

        for word in &mut self.buffer.words[..self.buffer.len] {
            // SAFETY: plain writes to our own buffer, made visible before the post.
            unsafe { core::ptr::write_volatile(word, *word) };
        }
        dsb();
        self.post(message)?;
        self.await_reply(message)?;
        dsb();
        self.buffer.reload();
        Ok(())
    }

    fn post(&self, message: u32) -> Result<(), MailboxError> {
        if !self.regs.poll32(STATUS, |s| s & STATUS_FULL == 0, POLL_BUDGET) {
            return Err(MailboxError::Timeout);
        }
        self.regs.write32(WRITE, message);
        Ok(())
    }

    fn await_reply(&self, message: u32) -> Result<(), MailboxError> {
        for _ in 0..FOREIGN_REPLY_BUDGET {
            if !self.regs.poll32(STATUS, |s| s & STATUS_EMPTY == 0, POLL_BUDGET) {
                return Err(MailboxError::Timeout);
            }
            if self.regs.read32(READ) == message {
                return Ok(());
            }
        }
        Err(MailboxError::Timeout)
    }
}

impl VideoCore for Mailbox {
    fn arm_memory(&mut self) -> Result<Range<u64>, MailboxError> {
        let at = encode_arm_memory(&mut self.buffer)?;
        self.call(CHANNEL_PROPERTY)?;
        decode_arm_memory(&self.buffer, at)
    }

    fn allocate_framebuffer(&mut self, width: u32, height: u32) -> Result<Framebuffer, MailboxError> {
        let tags = encode_framebuffer(&mut self.buffer, width, height)?;
        self.call(CHANNEL_PROPERTY)?;
        decode_framebuffer(&self.buffer, &tags)
    }
}
