//! Fixed-point message values.
//!
//! A value is an `i32` with an implicit binary point `shift` bits from the
//! right. Nodes never exchange floats.

/// A fixed-point value as carried on the wire.
pub type Value = i32;

/// Convert a real number to fixed point, rounding to nearest and saturating.
pub fn to_fixed(x: f64, shift: u32) -> Value {
    let scaled = (x * (1u64 << shift) as f64).round();
    scaled.clamp(f64::from(Value::MIN), f64::from(Value::MAX)) as Value
}

/// Convert a fixed-point value back to a real number.
pub fn from_fixed(value: Value, shift: u32) -> f64 {
    f64::from(value) / (1u64 << shift) as f64
}

/// Absolute difference of two values. Never overflows.
pub fn divergence(a: Value, b: Value) -> u32 {
    // |i32 - i32| <= u32::MAX
    (i64::from(a) - i64::from(b)).unsigned_abs() as u32
}
