/// A signed 24.8 fixed point number, as used on the wayland wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed(i32);

impl Fixed {
    /// Build from the raw wire representation
    #[inline]
    pub const fn from_raw(raw: i32) -> Fixed {
        Fixed(raw)
    }

    /// Raw wire representation
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert from an integer
    #[inline]
    pub const fn from_int(value: i32) -> Fixed {
        Fixed(value.wrapping_mul(256))
    }

    /// Convert from a floating point number, rounding to the closest representable value
    #[inline]
    pub fn from_f64(value: f64) -> Fixed {
        Fixed((value * 256.0).round() as i32)
    }

    /// Truncate to an integer, rounding towards zero
    #[inline]
    pub const fn to_int(self) -> i32 {
        self.0 / 256
    }

    /// Convert to a floating point number
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 256.0
    }

    /// Whether the value is zero or positive
    #[inline]
    pub const fn non_negative(self) -> bool {
        self.0 >= 0
    }
}

impl From<i32> for Fixed {
    #[inline]
    fn from(value: i32) -> Fixed {
        Fixed::from_int(value)
    }
}
