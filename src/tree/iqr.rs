//! # Inter-Key Range Fence
//!
//! Estimates, from the previous leaf's statistics, the key distance beyond
//! which an entry in the fast-path leaf counts as an outlier. The previous
//! leaf's range width stands in for the "typical" spread of the hot
//! region; the fence projects that spread onto the current leaf's
//! population and adds the usual IQR half-spread allowance.
//!
//! The estimator is a pure function of its three inputs, monotone in each,
//! and never below the observed width — a key inside the neighbour's own
//! spread is never an outlier.

/// Upper fence for the distance between the fast-path leaf's minimum and a
/// non-outlier key.
///
/// `prev_width` is the previous leaf's key-range width, `prev_len` its
/// population, `len` the fast-path leaf's population.
pub fn upper_bound(prev_width: u64, prev_len: usize, len: usize) -> u64 {
    debug_assert!(prev_len > 0);
    let per_key = prev_width.div_ceil(prev_len as u64);
    let projected = per_key.saturating_mul(len as u64);
    projected.saturating_add(projected / 2).max(prev_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_is_at_least_the_observed_width() {
        assert!(upper_bound(1000, 100, 1) >= 1000);
        assert!(upper_bound(1000, 100, 50) >= 1000);
        assert!(upper_bound(7, 200, 3) >= 7);
    }

    #[test]
    fn fence_is_monotone_in_each_argument() {
        assert!(upper_bound(2000, 100, 50) >= upper_bound(1000, 100, 50));
        assert!(upper_bound(1000, 100, 80) >= upper_bound(1000, 100, 50));
    }

    #[test]
    fn fence_projects_per_key_spacing() {
        // 100 keys spread over 1000 -> spacing 10; 200 keys project to
        // 2000 plus the half-spread allowance.
        assert_eq!(upper_bound(1000, 100, 200), 3000);
    }

    #[test]
    fn fence_saturates_instead_of_overflowing() {
        let fence = upper_bound(u64::MAX, 1, usize::MAX);
        assert_eq!(fence, u64::MAX);
    }
}
