//! Wrap-safe TCP sequence number arithmetic
//!
//! Sequence numbers live on a 2^32 circle. Two values are ordered by the
//! sign of their wrapping difference, so `0x0000_0010` is "after"
//! `0xffff_fff0` even though it is numerically smaller.

/// `a < b` on the sequence circle
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a <= b` on the sequence circle
#[inline]
pub fn seq_leq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// `a > b` on the sequence circle
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// `a >= b` on the sequence circle
#[inline]
pub fn seq_geq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// `low <= x < high`, all wrap-safe
#[inline]
pub fn seq_in_range(x: u32, low: u32, high: u32) -> bool {
    seq_geq(x, low) && seq_lt(x, high)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ordering() {
        assert!(seq_lt(100, 200));
        assert!(seq_gt(200, 100));
        assert!(seq_leq(100, 100));
        assert!(seq_geq(100, 100));
        assert!(!seq_lt(100, 100));
    }

    #[test]
    fn test_ordering_across_wrap() {
        let before = 0xffff_fff0;
        let after = 0x0000_0010;
        assert!(seq_lt(before, after));
        assert!(seq_gt(after, before));
    }

    #[test]
    fn test_range_across_wrap() {
        assert!(seq_in_range(2, 0xffff_fffe, 10));
        assert!(seq_in_range(0xffff_ffff, 0xffff_fffe, 10));
        assert!(!seq_in_range(10, 0xffff_fffe, 10));
        assert!(!seq_in_range(0xffff_fffd, 0xffff_fffe, 10));
    }
}
