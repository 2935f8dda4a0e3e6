use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct ProgressCounter {
    label: &'static str,
    interval: u64,
    count: AtomicU64,
    enabled: bool,
}

impl ProgressCounter {
    pub fn new(label: &'static str, interval: u64, enabled: bool) -> Self {
        let counter = Self {
            label,
            interval: interval.max(1),
            count: AtomicU64::new(0),
            enabled,
        };
        counter.print(0);
        counter
    }

    pub fn inc(&self, delta: u64) {
        let prev = self.count.fetch_add(delta, Ordering::SeqCst);
        let current = prev + delta;
        // Print if we crossed an interval boundary
        if prev / self.interval < current / self.interval {
            self.print(current);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn finish(&self) {
        if !self.enabled {
            return;
        }
        self.print(self.count());
        eprintln!();
    }

    fn print(&self, current: u64) {
        if !self.enabled {
            return;
        }
        eprint!("\r{}: {}", self.label, current);
        let _ = std::io::stderr().flush();
    }
}

/// Lets a warning through a fixed number of times, then stays quiet.
#[derive(Debug, Clone)]
pub struct WarnLimiter {
    remaining: u32,
}

impl WarnLimiter {
    pub const DEFAULT_LIMIT: u32 = 3;

    pub fn new(limit: u32) -> Self {
        Self { remaining: limit }
    }

    pub fn allow(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

impl Default for WarnLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

/// Formats a fixed-point value with `decimals` places, optionally dropping
/// trailing zeros down to a single fractional digit.
fn format_fixed(value: i32, decimals: u32, trim: bool) -> String {
    let scale = 10i64.pow(decimals);
    let abs = i64::from(value).abs();
    let int_part = abs / scale;
    let mut frac = format!("{:0width$}", abs % scale, width = decimals as usize);
    if trim {
        while frac.len() > 1 && frac.ends_with('0') {
            frac.pop();
        }
    }
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{int_part}.{frac}")
}

/// 1e-7 degrees as a decimal string without trailing zeros (`0.0` for zero).
pub fn sfix7(value: i32) -> String {
    format_fixed(value, 7, true)
}

/// 1e-7 degrees with all seven decimals.
pub fn sfix7_padded(value: i32) -> String {
    format_fixed(value, 7, false)
}

/// 1e-6 degrees with all six decimals.
pub fn sfix6_padded(value: i32) -> String {
    format_fixed(value, 6, false)
}

/// Rounds 1e-7 degrees to 1e-6, half away from zero.
pub fn round_to_micro(value: i32) -> i32 {
    if value >= 0 {
        (value + 5) / 10
    } else {
        (value - 5) / 10
    }
}

/// Parses a decimal degree string into 1e-7 fixed point. Digits past the
/// seventh decimal are truncated; `None` on anything that does not start
/// like a number.
pub fn parse_fixed7(text: &str) -> Option<i32> {
    let bytes = text.as_bytes();
    let (negative, rest) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    match rest.first() {
        Some(b) if b.is_ascii_digit() || *b == b'.' => {}
        _ => return None,
    }

    let mut value: i64 = 0;
    let mut decimals: Option<u32> = None;
    for &b in rest {
        if b == b'.' {
            if decimals.is_some() {
                break;
            }
            decimals = Some(0);
            continue;
        }
        if !b.is_ascii_digit() || decimals == Some(7) {
            break;
        }
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
        if let Some(d) = decimals.as_mut() {
            *d += 1;
        }
    }
    let value = value.saturating_mul(10i64.pow(7 - decimals.unwrap_or(0)));
    let value = if negative { -value } else { value };
    i32::try_from(value).ok()
}
