//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic scalar math for the simulation. All gameplay logic uses
//! integer arithmetic only - no floats anywhere between two state digests.
//!
//! ## Format: Q16.16
//!
//! ```text
//! [S][IIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]
//!  |  └── 15 bits ──┘ └─── 16 bits ───┘
//!  └─ Sign bit
//!
//! Range: -32768.0 to +32767.99998 (approx)
//! Precision: 1/65536 ≈ 0.000015 units
//! ```
//!
//! ## Why Q16.16?
//!
//! - Identical results on every platform (x86, ARM, WASM)
//! - 32k unit range covers any arena the solver steps
//! - Fast integer ops, no FPU mode-dependence

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

/// Convert a compile-time float to fixed-point.
///
/// Only for constants and initialization. Never inside a step.
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to float for display only.
///
/// The result must never flow back into simulation state.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers.
///
/// Widens to i64 to avoid intermediate overflow, truncates toward zero.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers.
///
/// Divide-by-zero returns 0 rather than panicking, so that a garbage
/// input can never abort a step.
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Absolute value.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 {
        x.wrapping_neg()
    } else {
        x
    }
}

/// Clamp into `[lo, hi]`.
#[inline]
pub fn fixed_clamp(x: Fixed, lo: Fixed, hi: Fixed) -> Fixed {
    x.max(lo).min(hi)
}
