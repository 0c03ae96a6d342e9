//! Receive timeout ramp of a registration round.
//!
//! The first P probes wait T; after that each probe waits one unit longer than the
//! previous one until the wait reaches Q * T, where it stays. With the default timing
//! the sequence is 1, 1, 2, 3, 3, 3.

use crate::protocol::Timing;

/// Timeout in units for probe `num_package` (0-based), given the previous probe's timeout.
pub fn calculate_timeout(timing: &Timing, num_package: u32, previous: u64) -> u64 {
    let cap = timing.max_timeout();
    if num_package < timing.fast_probes {
        timing.base_timeout
    } else if previous >= cap {
        cap
    } else {
        (previous + 1).min(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(timing: &Timing, n: u32) -> Vec<u64> {
        let mut prev = 0;
        (0..n)
            .map(|k| {
                prev = calculate_timeout(timing, k, prev);
                prev
            })
            .collect()
    }

    #[test]
    fn default_sequence() {
        assert_eq!(sequence(&Timing::default(), 6), vec![1, 1, 2, 3, 3, 3]);
    }

    #[test]
    fn fast_probes_always_base() {
        let t = Timing::default();
        for prev in [0, 1, 3, 50] {
            assert_eq!(calculate_timeout(&t, 0, prev), 1);
            assert_eq!(calculate_timeout(&t, 1, prev), 1);
        }
    }

    #[test]
    fn plateau_holds_regardless_of_index() {
        let t = Timing::default();
        for k in [2, 5, 100, u32::MAX] {
            assert_eq!(calculate_timeout(&t, k, 3), 3);
        }
    }

    #[test]
    fn linear_ramp_between() {
        let t = Timing {
            base_timeout: 2,
            fast_probes: 1,
            max_timeout_factor: 4,
            ..Timing::default()
        };
        assert_eq!(sequence(&t, 10), vec![2, 3, 4, 5, 6, 7, 8, 8, 8, 8]);
    }
}
