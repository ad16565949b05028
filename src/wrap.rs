/// A sequence number in the 32-bit wrapping space used on the wire. We use a wrapper around a
/// `u32` to prevent mistakes involving adding or comparing raw sequence numbers.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Wrap32(u32);

// We don't implement `From<u32>` or `Deref` since it makes it easier to accidentally mix up
// operating on a `u32` instead of a `Wrap32`, which has a different wrapping behaviour. We don't
// implement `PartialOrd` or `Ord` since there is no ordering relation between arbitrary sequence
// numbers modulo 2^32.
static_assertions::assert_not_impl_any!(Wrap32: PartialOrd, Ord, From<u32>, std::ops::Deref);

impl Wrap32 {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Maps the absolute (64-bit, non-wrapping) sequence number `n` into the wrapped space whose
    /// origin is `zero_point`.
    #[inline]
    pub fn wrap(n: u64, zero_point: Wrap32) -> Self {
        Self(zero_point.0.wrapping_add(n as u32))
    }

    /// Maps this wrapped value back to the absolute sequence number closest to `checkpoint`.
    ///
    /// Of the infinitely many absolute values that project onto this wrapped value, the unique one
    /// in `[checkpoint - 2^31, checkpoint + 2^31)` is returned, clamped to be non-negative; a tie
    /// breaks toward the smaller candidate.
    pub fn unwrap(self, zero_point: Wrap32, checkpoint: u64) -> u64 {
        let checkpoint_wrapped = Self::wrap(checkpoint, zero_point);

        let backward = u64::from(checkpoint_wrapped.0.wrapping_sub(self.0));
        if backward <= u64::from(u32::MAX / 2) && checkpoint >= backward {
            checkpoint - backward
        } else {
            checkpoint + u64::from(self.0.wrapping_sub(checkpoint_wrapped.0))
        }
    }
}

impl std::fmt::Debug for Wrap32 {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for Wrap32 {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Wrap32> for u32 {
    #[inline]
    fn from(x: Wrap32) -> Self {
        x.0
    }
}

impl std::ops::Add<u32> for Wrap32 {
    type Output = Self;

    fn add(self, offset: u32) -> Self::Output {
        Self(self.0.wrapping_add(offset))
    }
}

impl std::ops::Sub<u32> for Wrap32 {
    type Output = Self;

    fn sub(self, offset: u32) -> Self::Output {
        Self(self.0.wrapping_sub(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // helper to make the tests fit on a single line
    fn wrap32(raw: u32) -> Wrap32 {
        Wrap32::new(raw)
    }

    #[test]
    fn test_wrap() {
        assert_eq!(Wrap32::wrap(0, wrap32(0)), wrap32(0));
        assert_eq!(Wrap32::wrap(17, wrap32(5)), wrap32(22));
        assert_eq!(Wrap32::wrap(u64::from(u32::MAX) + 1, wrap32(5)), wrap32(5));
        assert_eq!(Wrap32::wrap(3 * (1 << 32), wrap32(0)), wrap32(0));
        assert_eq!(Wrap32::wrap(3 * (1 << 32) + 17, wrap32(15)), wrap32(32));
        assert_eq!(Wrap32::wrap(7, wrap32(u32::MAX - 3)), wrap32(3));
    }

    #[test]
    fn test_unwrap_near_checkpoint() {
        // wrapped value one past the zero point unwraps to 1 for a small checkpoint
        assert_eq!(wrap32(1).unwrap(wrap32(0), 0), 1);

        // value behind the checkpoint
        assert_eq!(wrap32(10).unwrap(wrap32(0), 100), 10);

        // checkpoint pulls the result into a later wrap of the space
        let period = 1u64 << 32;
        assert_eq!(wrap32(10).unwrap(wrap32(0), period), period + 10);
        assert_eq!(wrap32(10).unwrap(wrap32(0), 5 * period + 1), 5 * period + 10);
    }

    #[test]
    fn test_unwrap_crossing_zero_point() {
        // the wrapped space's origin sits just below the 32-bit boundary, and the checkpoint is
        // past the first wrap; the nearest absolute value lies beyond the checkpoint
        let zero_point = wrap32(0xFFFF_FFF0);
        let checkpoint = (1u64 << 32) + 16;
        assert_eq!(wrap32(0x0000_0010).unwrap(zero_point, checkpoint), (1 << 32) + 32);
    }

    #[test]
    fn test_unwrap_clamps_non_negative() {
        // the candidate below the checkpoint would be negative, so the one above wins
        assert_eq!(wrap32(u32::MAX).unwrap(wrap32(0), 0), u64::from(u32::MAX));
        assert_eq!(wrap32(u32::MAX - 1).unwrap(wrap32(0), 3), u64::from(u32::MAX) - 1);
    }

    #[test]
    fn test_unwrap_half_period_distance() {
        // a candidate exactly 2^31 behind the checkpoint is considered too far back; the search
        // interval is (checkpoint - 2^31, checkpoint + 2^31]
        let half = 1u64 << 31;
        assert_eq!(wrap32(half as u32).unwrap(wrap32(0), 0), half);
        assert_eq!(wrap32(0).unwrap(wrap32(0), half), 2 * half);
        assert_eq!(wrap32(1).unwrap(wrap32(0), half + 1), 2 * half + 1);
        assert_eq!(wrap32(2).unwrap(wrap32(0), half + 1), 2);
    }

    #[test]
    fn test_roundtrip() {
        // Test that `wrap` followed by `unwrap` recovers `n` whenever the checkpoint is within
        // 2^31 of it. Sweeps offsets to confirm behaviour across the 32-bit wrapping point.
        fn test_one(zero_point: Wrap32, n: u64, checkpoint: u64) {
            assert_eq!(Wrap32::wrap(n, zero_point).unwrap(zero_point, checkpoint), n);
        }

        let big = 1u64 << 31;
        for &zero in &[wrap32(0), wrap32(1), wrap32(u32::MAX), wrap32(0x5a5a_5a5a)] {
            for &n in &[big, 3 * big, 5 * big, (1 << 40) + 17] {
                for offset in -60i64..60 {
                    let checkpoint = n.checked_add_signed(offset).unwrap();
                    test_one(zero, n, checkpoint);
                }
                test_one(zero, n, n - big);
                test_one(zero, n, n + big - 1);
            }
        }
    }

    #[test]
    fn test_roundtrip_randomized() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        for _ in 0..1_000 {
            let zero_point = wrap32(rng.gen());
            let n: u64 = rng.gen_range(1 << 31..1 << 62);
            let checkpoint = n.checked_add_signed(rng.gen_range(-(1 << 30)..1 << 30)).unwrap();
            assert_eq!(Wrap32::wrap(n, zero_point).unwrap(zero_point, checkpoint), n);
        }
    }
}
