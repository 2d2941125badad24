//! # Portable IEEE-754
//!
//! Converts floating point values to and from their IEEE-754 bit patterns using
//! arithmetic only, so the wire format never depends on how the host lays out
//! its native floats.
//!
//! ## Invariants
//! - `unpack754(pack754(x)) == x` for every finite `x` representable in the target width.
//! - Signed zero, infinities and subnormals are encoded explicitly.
//! - NaN always packs to the canonical quiet NaN; payloads are not preserved.

/// Packs `f` into a `bits` wide pattern with `expbits` exponent bits.
///
/// Values too large for the target width saturate to infinity; values too small
/// round to the nearest subnormal (or zero).
pub fn pack754(f: f64, bits: u32, expbits: u32) -> u64 {
    let sig_bits = bits - expbits - 1;
    let bias = (1i32 << (expbits - 1)) - 1;
    let exp_max = (1u64 << expbits) - 1;
    let infinity = exp_max << sig_bits;
    let scale = (1u64 << sig_bits) as f64;

    if f.is_nan() {
        return infinity | (1u64 << (sig_bits - 1));
    }

    let sign = if f.is_sign_negative() { 1u64 << (bits - 1) } else { 0 };
    let mut norm = f.abs();

    if norm == 0.0 {
        return sign;
    }
    if norm.is_infinite() {
        return sign | infinity;
    }

    // normalize into [1, 2), tracking the binary exponent
    let mut shift: i32 = 0;
    while norm >= 2.0 {
        norm /= 2.0;
        shift += 1;
    }
    while norm < 1.0 {
        norm *= 2.0;
        shift -= 1;
    }

    let exp = shift + bias;
    let magnitude = if exp >= exp_max as i32 {
        infinity
    } else if exp > 0 {
        let mantissa = ((norm - 1.0) * scale).round() as u64;
        // a mantissa rounded up to 2^sig_bits carries into the exponent
        ((exp as u64) << sig_bits) + mantissa
    } else {
        // subnormal: value = frac * 2^(1 - bias), frac in [0, 1)
        let mut frac = norm;
        for _ in exp..1 {
            frac /= 2.0;
        }
        (frac * scale).round() as u64
    };

    sign | magnitude.min(infinity)
}

/// Inverse of [`pack754`].
pub fn unpack754(i: u64, bits: u32, expbits: u32) -> f64 {
    let sig_bits = bits - expbits - 1;
    let bias = (1i32 << (expbits - 1)) - 1;
    let exp_max = (1u64 << expbits) - 1;
    let scale = (1u64 << sig_bits) as f64;

    let negative = (i >> (bits - 1)) & 1 == 1;
    let exp_field = (i >> sig_bits) & exp_max;
    let mantissa = i & ((1u64 << sig_bits) - 1);

    let magnitude = if exp_field == exp_max {
        if mantissa != 0 {
            return f64::NAN;
        }
        f64::INFINITY
    } else {
        let (mut value, mut shift) = if exp_field == 0 {
            (mantissa as f64 / scale, 1 - bias)
        } else {
            (1.0 + mantissa as f64 / scale, exp_field as i32 - bias)
        };
        while shift > 0 {
            value *= 2.0;
            shift -= 1;
        }
        while shift < 0 {
            value /= 2.0;
            shift += 1;
        }
        value
    };

    if negative { -magnitude } else { magnitude }
}

/// Packs a single precision value (1 sign, 8 exponent, 23 mantissa bits).
pub fn pack754_32(f: f32) -> u32 {
    pack754(f as f64, 32, 8) as u32
}

/// Unpacks a single precision pattern.
pub fn unpack754_32(i: u32) -> f32 {
    unpack754(i as u64, 32, 8) as f32
}

/// Packs a double precision value (1 sign, 11 exponent, 52 mantissa bits).
pub fn pack754_64(f: f64) -> u64 {
    pack754(f, 64, 11)
}

/// Unpacks a double precision pattern.
pub fn unpack754_64(i: u64) -> f64 {
    unpack754(i, 64, 11)
}
