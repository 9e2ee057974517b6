//! Level Scaling
//!
//! The panel reports and accepts load levels on a 0-99 scale; most callers
//! think in 0-255. Conversions round to nearest and clamp both ends.
//!
//! Converting back and forth is not lossless: 256 wide values share 100
//! narrow ones, so a round trip may drift by one step.

/// Highest level on the panel's scale
pub const NARROW_MAX: i32 = 99;

/// Highest level on the caller's scale
pub const WIDE_MAX: i32 = 255;

/// Convert a panel level (0-99) to 0-255
pub fn to_wide(level: i32) -> u8 {
    let level = level.clamp(0, NARROW_MAX);
    // Neither 255/99 nor 99/255 ever lands on a half, so +den/2 rounds to nearest
    let wide = (level * WIDE_MAX + NARROW_MAX / 2) / NARROW_MAX;
    wide.clamp(0, WIDE_MAX) as u8
}

/// Convert a 0-255 level to the panel's 0-99 scale
pub fn to_narrow(level: i32) -> u8 {
    let level = level.clamp(0, WIDE_MAX);
    let narrow = (level * NARROW_MAX + WIDE_MAX / 2) / WIDE_MAX;
    narrow.clamp(0, NARROW_MAX) as u8
}

/// Check if a panel level means "on"
pub fn is_on(level: u8) -> bool {
    level > 0
}
