use std::env;

/// Where the trim threshold comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimThreshold {
    /// A fixed number of bytes.
    Fixed(usize),
    /// Read from the named environment variable every time it is needed.
    /// Missing or malformed values fall back to [`TrimThreshold::DEFAULT`].
    Env(&'static str),
}

impl TrimThreshold {
    /// Trailing free space tolerated before memory goes back to the OS.
    pub const DEFAULT: usize = 1_000_000_000;

    /// Variable consulted by the default configuration.
    pub const ENV_VAR: &'static str = "M_TRIM_THRESHOLD";

    /// Resolves the threshold in bytes.
    pub fn resolve(&self) -> usize {
        match *self {
            TrimThreshold::Fixed(bytes) => bytes,
            TrimThreshold::Env(name) => match env::var(name) {
                Ok(value) => parse_threshold(&value).unwrap_or_else(|| {
                    log::debug!("ignoring malformed {name}={value:?}");
                    Self::DEFAULT
                }),
                Err(_) => Self::DEFAULT,
            },
        }
    }
}

impl Default for TrimThreshold {
    fn default() -> Self {
        TrimThreshold::Env(Self::ENV_VAR)
    }
}

/// Tunables of a [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub trim_threshold: TrimThreshold,
}

impl HeapConfig {
    pub const fn new(trim_threshold: TrimThreshold) -> Self {
        Self { trim_threshold }
    }

    /// Configuration that never reads the environment.
    pub const fn fixed(trim_threshold: usize) -> Self {
        Self::new(TrimThreshold::Fixed(trim_threshold))
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new(TrimThreshold::Env(TrimThreshold::ENV_VAR))
    }
}

/// Parses a byte count written the way C's `strtol(s, NULL, 0)` reads it:
/// `0x` means hexadecimal, a leading `0` octal, anything else decimal.
///
/// Unlike `strtol`, trailing garbage, an empty string and negative numbers
/// are rejected instead of being silently turned into something.
pub(crate) fn parse_threshold(value: &str) -> Option<usize> {
    let value = value.trim();
    let value = value.strip_prefix('+').unwrap_or(value);

    let (digits, radix) = if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        (hex, 16)
    } else if value.len() > 1 && value.starts_with('0') {
        (&value[1..], 8)
    } else {
        (value, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    usize::from_str_radix(digits, radix).ok()
}
