use std::cmp::Ordering;
use std::fmt;

/// Rational tick duration: one tick lasts `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    pub num: i64,
    pub den: i64,
}

impl Timebase {
    /// MPEG-TS system clock for PTS/DTS.
    pub const MPEG_TS: Timebase = Timebase::new(1, 90_000);
    pub const MILLISECONDS: Timebase = Timebase::new(1, 1_000);

    /// Unchecked; see [`Timebase::is_valid`].
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// `1 / hz` timebase, e.g. a sample rate or an MP4 timescale.
    pub const fn from_hz(hz: u32) -> Self {
        Self::new(1, hz as i64)
    }

    /// Both terms strictly positive. Rescaling from or to an invalid
    /// timebase saturates rather than panicking.
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Seconds per tick, for logging.
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Converts `ts` from one clock to another: `round(ts * n1 * d2 / (n2 * d1))`.
///
/// Rounds half away from zero and saturates at the `i64` range. `i64::MIN` and
/// `i64::MAX` are treated as "no timestamp" markers and pass through unchanged.
/// The intermediate product is carried in 256 bits.
pub fn rescale(ts: i64, from: Timebase, to: Timebase) -> i64 {
    if ts == i64::MIN || ts == i64::MAX || from == to {
        return ts;
    }
    let scale = from.num as i128 * to.den as i128;
    let divisor = to.num as i128 * from.den as i128;
    let negative = (ts < 0) ^ (scale < 0) ^ (divisor < 0);
    let saturated = if negative { i64::MIN } else { i64::MAX };
    if ts == 0 || scale == 0 {
        return 0;
    }
    let d = divisor.unsigned_abs();
    if d == 0 {
        return saturated;
    }

    let (hi, lo) = mul_wide(ts.unsigned_abs() as u128, scale.unsigned_abs());
    if hi >= d {
        return saturated;
    }
    let (quotient, remainder) = div_wide(hi, lo, d);
    let magnitude = if remainder >= d - remainder {
        quotient.saturating_add(1)
    } else {
        quotient
    };
    if negative {
        if magnitude > i64::MIN.unsigned_abs() as u128 {
            i64::MIN
        } else {
            (magnitude as i128).wrapping_neg() as i64
        }
    } else {
        i64::try_from(magnitude).unwrap_or(i64::MAX)
    }
}

/// Compares two timestamps expressed in different clocks without rounding.
pub fn compare_ts(a: i64, tb_a: Timebase, b: i64, tb_b: Timebase) -> Ordering {
    let lhs = signed_wide(a, tb_a.num as i128 * tb_b.den as i128);
    let rhs = signed_wide(b, tb_b.num as i128 * tb_a.den as i128);
    match (lhs, rhs) {
        ((false, l), (false, r)) => l.cmp(&r),
        ((true, l), (true, r)) => r.cmp(&l),
        ((true, l), (false, r)) if l == (0, 0) && r == (0, 0) => Ordering::Equal,
        ((true, _), (false, _)) => Ordering::Less,
        ((false, l), (true, r)) if l == (0, 0) && r == (0, 0) => Ordering::Equal,
        ((false, _), (true, _)) => Ordering::Greater,
    }
}

/// `ts * factor` as a sign and a 256-bit magnitude `(high, low)`.
fn signed_wide(ts: i64, factor: i128) -> (bool, (u128, u128)) {
    let negative = (ts < 0) ^ (factor < 0);
    (
        negative,
        mul_wide(ts.unsigned_abs() as u128, factor.unsigned_abs()),
    )
}

/// `a * x` as `(high, low)` 128-bit halves. `a` must be below 2^64.
fn mul_wide(a: u128, x: u128) -> (u128, u128) {
    let (x_hi, x_lo) = (x >> 64, x & u64::MAX as u128);
    let low = a * x_lo;
    let mid = a * x_hi;
    let (lo, carry) = low.overflowing_add(mid << 64);
    ((mid >> 64) + carry as u128, lo)
}

/// Divides the 256-bit value `(hi, lo)` by `d`, returning quotient and
/// remainder. Requires `hi < d`.
fn div_wide(hi: u128, lo: u128, d: u128) -> (u128, u128) {
    if hi == 0 {
        return (lo / d, lo % d);
    }
    let mut rem = hi;
    let mut quot = 0u128;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> bit) & 1);
        quot <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quot |= 1;
        }
    }
    (quot, rem)
}
