//! Fixed-Point 2D Vector
//!
//! Minimal vector type for positions and velocities inside the
//! deterministic solver. Component-wise wrapping semantics throughout.

use serde::{Deserialize, Serialize};

use super::fixed::{fixed_clamp, fixed_mul, Fixed};

/// 2D vector with Q16.16 components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component (Q16.16 fixed-point)
    pub x: Fixed,
    /// Y component (Q16.16 fixed-point)
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create from raw fixed-point components.
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Component-wise addition (wrapping).
    #[inline]
    pub fn add(self, other: FixedVec2) -> FixedVec2 {
        FixedVec2 {
            x: self.x.wrapping_add(other.x),
            y: self.y.wrapping_add(other.y),
        }
    }

    /// Component-wise subtraction (wrapping).
    #[inline]
    pub fn sub(self, other: FixedVec2) -> FixedVec2 {
        FixedVec2 {
            x: self.x.wrapping_sub(other.x),
            y: self.y.wrapping_sub(other.y),
        }
    }

    /// Scale both components by a fixed-point factor.
    #[inline]
    pub fn scale(self, factor: Fixed) -> FixedVec2 {
        FixedVec2 {
            x: fixed_mul(self.x, factor),
            y: fixed_mul(self.y, factor),
        }
    }

    /// Squared length. Prefer this over any sqrt-based length.
    #[inline]
    pub fn length_squared(self) -> Fixed {
        fixed_mul(self.x, self.x).wrapping_add(fixed_mul(self.y, self.y))
    }

    /// Clamp both components into `[-half_extent, +half_extent]`.
    #[inline]
    pub fn clamp_to_bounds(self, half_extent: FixedVec2) -> FixedVec2 {
        FixedVec2 {
            x: fixed_clamp(self.x, -half_extent.x, half_extent.x),
            y: fixed_clamp(self.y, -half_extent.y, half_extent.y),
        }
    }
}
