//! The environment page: the kernel's copy of the configuration text and the
//! few keys the loader itself interprets.

use loader_protocol::memory::ENVIRONMENT_SIZE;

pub const DEFAULT_KERNEL: &str = "sys/core";
pub const DEFAULT_SCREEN: (u32, u32) = (1024, 768);
pub const MIN_SCREEN: (u32, u32) = (640, 480);
/// Longest kernel path, excluding the terminator.
pub const MAX_KERNEL_PATH: usize = 63;

/// Keys the loader acts on. Everything else is only passed to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub screen_width: u32,
    pub screen_height: u32,
    kernel: [u8; MAX_KERNEL_PATH],
    kernel_len: usize,
}

impl Default for Environment {
    fn default() -> Self {
        let mut kernel = [0; MAX_KERNEL_PATH];
        kernel[..DEFAULT_KERNEL.len()].copy_from_slice(DEFAULT_KERNEL.as_bytes());
        Self {
            screen_width: DEFAULT_SCREEN.0,
            screen_height: DEFAULT_SCREEN.1,
            kernel,
            kernel_len: DEFAULT_KERNEL.len(),
        }
    }
}

impl Environment {
    /// Parses configuration text. Stops at the first NUL.
    ///
    /// Whitespace separates `key=value` tokens; `#` and `//` comment out the
    /// rest of a line and `/* */` a block. Unknown keys are ignored.
    #[must_use]
    pub fn parse(text: &[u8]) -> Self {
        let text = &text[..text.iter().position(|&b| b == 0).unwrap_or(text.len())];
        let mut env = Self::default();
        let mut pos = 0;

        while pos < text.len() {
            let rest = &text[pos..];
            if rest[0].is_ascii_whitespace() {
                pos += 1;
            } else if rest.starts_with(b"#") || rest.starts_with(b"//") {
                pos += rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
            } else if rest.starts_with(b"/*") {
                pos += rest
                    .windows(2)
                    .skip(2)
                    .position(|w| w == b"*/")
                    .map_or(rest.len(), |end| end + 4);
            } else {
                let len = rest
                    .iter()
                    .position(u8::is_ascii_whitespace)
                    .unwrap_or(rest.len());
                env.apply(&rest[..len]);
                pos += len;
            }
        }
        env
    }

    fn apply(&mut self, token: &[u8]) {
        if let Some(value) = token.strip_prefix(b"screen=") {
            match parse_screen(value) {
                Some((width, height)) => {
                    self.screen_width = width.max(MIN_SCREEN.0);
                    self.screen_height = height.max(MIN_SCREEN.1);
                }
                None => log::warn!("Ignoring malformed screen size"),
            }
        } else if let Some(path) = token.strip_prefix(b"kernel=") {
            if path.is_empty() || core::str::from_utf8(path).is_err() {
                log::warn!("Ignoring malformed kernel path");
                return;
            }
            let mut len = path.len().min(MAX_KERNEL_PATH);
            if len < path.len() {
                log::warn!("Kernel path truncated to {MAX_KERNEL_PATH} bytes");
                while core::str::from_utf8(&path[..len]).is_err() {
                    len -= 1;
                }
            }
            self.kernel = [0; MAX_KERNEL_PATH];
            self.kernel[..len].copy_from_slice(&path[..len]);
            self.kernel_len = len;
        }
    }

    #[must_use]
    pub fn kernel_path(&self) -> &str {
        core::str::from_utf8(&self.kernel[..self.kernel_len]).unwrap_or(DEFAULT_KERNEL)
    }
}

fn parse_decimal(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u32, |acc, &d| {
        let digit = char::from(d).to_digit(10)?;
        acc.checked_mul(10)?.checked_add(digit)
    })
}

fn parse_screen(value: &[u8]) -> Option<(u32, u32)> {
    let split = value.iter().position(|&b| b == b'x')?;
    Some((parse_decimal(&value[..split])?, parse_decimal(&value[split + 1..])?))
}

/// The page the kernel finds at [`BOOTBOOT_ENV`](loader_protocol::memory::BOOTBOOT_ENV).
#[repr(C, align(4096))]
pub struct EnvironmentPage([u8; ENVIRONMENT_SIZE]);

impl Default for EnvironmentPage {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentPage {
    #[must_use]
    pub const fn new() -> Self {
        Self([0; ENVIRONMENT_SIZE])
    }

    /// Replaces the contents with `config`, truncated to leave room for the terminating NUL.
    /// Returns the number of bytes kept.
    pub fn load(&mut self, config: &[u8]) -> usize {
        let len = config.len().min(ENVIRONMENT_SIZE - 1);
        if len < config.len() {
            log::warn!("Configuration truncated from {} to {len} bytes", config.len());
        }
        self.0.fill(0);
        self.0[..len].copy_from_slice(&config[..len]);
        len
    }

    /// The text up to the terminating NUL.
    #[must_use]
    pub fn text(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(ENVIRONMENT_SIZE);
        &self.0[..len]
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ENVIRONMENT_SIZE] {
        &self.0
    }

    #[must_use]
    pub fn address(&self) -> u64 {
        core::ptr::from_ref(self) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_configuration() {
        let env = Environment::parse(b"");
        assert_eq!((env.screen_width, env.screen_height), DEFAULT_SCREEN);
        assert_eq!(env.kernel_path(), "sys/core");
    }

    #[test]
    fn reads_known_keys_and_skips_comments() {
        let text = b"# screen=2000x2000\n\
                     // kernel=not/this\n\
                     /* kernel=nor/this\n screen=1x1 */\n\
                     screen=1920x1080 debug=1\n\
                     \tkernel=boot/kernel.elf\n";
        let env = Environment::parse(text);
        assert_eq!((env.screen_width, env.screen_height), (1920, 1080));
        assert_eq!(env.kernel_path(), "boot/kernel.elf");
    }

    #[test]
    fn screen_is_clamped_to_minimum() {
        let env = Environment::parse(b"screen=320x200");
        assert_eq!((env.screen_width, env.screen_height), MIN_SCREEN);
        let env = Environment::parse(b"screen=800xabc kernel=");
        assert_eq!((env.screen_width, env.screen_height), DEFAULT_SCREEN);
        assert_eq!(env.kernel_path(), DEFAULT_KERNEL);
    }

    #[test]
    fn long_kernel_path_is_truncated() {
        let mut text = b"kernel=".to_vec();
        text.extend(std::iter::repeat_n(b'k', 100));
        let env = Environment::parse(&text);
        assert_eq!(env.kernel_path().len(), MAX_KERNEL_PATH);
    }

    #[test]
    fn parsing_stops_at_nul() {
        let env = Environment::parse(b"screen=800x600\0kernel=after/nul");
        assert_eq!(env.screen_width, 800);
        assert_eq!(env.kernel_path(), DEFAULT_KERNEL);
    }

    #[test]
    fn page_keeps_text_verbatim_and_terminated() {
        let mut page = Box::new(EnvironmentPage::new());
        assert_eq!(page.load(b"screen=800x600\nfoo=bar\n"), 23);
        assert_eq!(page.text(), b"screen=800x600\nfoo=bar\n");
        assert_eq!(page.address() % 4096, 0);

        let big = vec![b'a'; 5000];
        assert_eq!(page.load(&big), 4095);
        assert_eq!(page.as_bytes()[4095], 0);
        assert_eq!(page.text().len(), 4095);
    }
}
