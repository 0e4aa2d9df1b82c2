//! The packed-long encoding used for every length, count, and id on the wire.
//!
//! A packed long is one to five bytes. The first byte either holds the whole
//! value (zero, or a small value offset by five) or declares how many
//! little-endian payload bytes follow: `1..=4` for non-negative values
//! (zero-extended) and `-1..=-4` for negative values (ones-extended).

use crate::error::{Error, Result};

/// Appends the shortest packed-long form of `n` to `out`.
///
/// Callers are expected to stay within the fixnum range; four payload bytes
/// always suffice for those values.
pub fn encode_packed_long(n: i64, out: &mut Vec<u8>) {
    if n == 0 {
        out.push(0);
        return;
    } else if 0 < n && n < 0x7B {
        out.push((n + 5) as u8);
        return;
    } else if -0x7C < n && n < 0 {
        out.push(((n - 5) & 0xFF) as u8);
        return;
    }

    let marker = out.len();
    out.push(0);

    let mut n = n;
    for i in 1..=4u8 {
        out.push((n & 0xFF) as u8);
        n >>= 8;
        if n == 0 {
            out[marker] = i;
            return;
        }
        if n == -1 {
            out[marker] = (-(i as i8)) as u8;
            return;
        }
    }

    unreachable!("value outside the packed long range");
}

/// Decodes a packed long from the front of `buf`.
///
/// Returns the value and the number of bytes consumed. Non-minimal forms are
/// accepted; a buffer shorter than the declared payload is an
/// [`Error::UnexpectedEof`] whose offset is relative to the start of `buf`.
pub fn decode_packed_long(buf: &[u8]) -> Result<(i64, usize)> {
    let c = *buf.first().ok_or(Error::UnexpectedEof { offset: 0 })? as i8;

    match c {
        0 => Ok((0, 1)),
        5..=127 => Ok((i64::from(c) - 5, 1)),
        -128..=-5 => Ok((i64::from(c) + 5, 1)),
        _ => {
            let len = c.unsigned_abs() as usize;
            if buf.len() < 1 + len {
                return Err(Error::UnexpectedEof { offset: buf.len() });
            }

            let mut n: i64 = if c > 0 { 0 } else { -1 };
            for (i, &b) in buf[1..=len].iter().enumerate() {
                n &= !(0xFF << (8 * i));
                n |= i64::from(b) << (8 * i);
            }
            Ok((n, 1 + len))
        }
    }
}
