//! Weighted scheduling credit ("points") for read tags.
//!
//! Each time a read tag is serviced its weight is added to its points and the
//! tag with the fewest points is serviced next, so a tag's polling frequency is
//! inversely proportional to its weight. `rebase` keeps the counters small by
//! shifting every tag down by `M`, the least common multiple of the weights.
//! Both rules shift all tags uniformly, so relative order is never disturbed.

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple of all weights. Saturates at `u64::MAX`, which
/// effectively disables re-basing. Returns 0 for an empty set.
pub fn lcm_of(weights: &[u32]) -> u64 {
    weights.iter().fold(0u64, |acc, &w| {
        let w = u64::from(w.max(1));
        if acc == 0 {
            return w;
        }
        (acc / gcd(acc, w)).checked_mul(w).unwrap_or(u64::MAX)
    })
}

/// Applies both re-basing rules to the points of a device's read tags.
///
/// 1. When the minimum is a positive multiple of `M`, subtract `M` from all.
/// 2. When every tag lies within `[max - M, max]` and the band below `max`
///    is occupied by exactly one points value `v` (or is empty, then
///    `v = max`) with `v >= M`, subtract `M` from every tag at or above `v`.
///
/// Rule 2 needs an exact uniform band; for some weight mixes it never fires
/// and points keep growing slowly.
pub fn rebase(points: &mut [u64], weights: &[u32]) {
    let m = lcm_of(weights);
    if m == 0 || m == u64::MAX {
        return;
    }

    if let Some(&min) = points.iter().min() {
        if min > 0 && min % m == 0 {
            for p in points.iter_mut() {
                *p = p.saturating_sub(m);
            }
        }
    }
    rebase_uniform_band(points, m);
}

fn rebase_uniform_band(points: &mut [u64], m: u64) {
    let Some(&max) = points.iter().max() else {
        return;
    };
    if points.iter().any(|&p| p.saturating_add(m) < max) {
        return;
    }

    let mut below = points.iter().copied().filter(|&p| p < max);
    let v = match below.next() {
        None => max,
        Some(first) if below.all(|p| p == first) => first,
        Some(_) => return,
    };

    if v >= m {
        for p in points.iter_mut().filter(|p| **p >= v) {
            *p -= m;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Services the tag with the fewest points (first on ties) `rounds` times
    /// and returns how often each tag was picked.
    fn simulate(weights: &[u32], rounds: usize, max_seen: &mut u64) -> Vec<u64> {
        let mut points = vec![0u64; weights.len()];
        let mut counts = vec![0u64; weights.len()];
        for _ in 0..rounds {
            let (next, _) = points
                .iter()
                .enumerate()
                .min_by_key(|(i, p)| (**p, *i))
                .unwrap();
            points[next] += u64::from(weights[next]);
            counts[next] += 1;
            rebase(&mut points, weights);
            *max_seen = (*max_seen).max(*points.iter().max().unwrap());
        }
        counts
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm_of(&[]), 0);
        assert_eq!(lcm_of(&[3]), 3);
        assert_eq!(lcm_of(&[2, 3, 4]), 12);
        assert_eq!(lcm_of(&[5, 5]), 5);
    }

    #[test]
    fn test_rebase_on_multiple_of_lcm() {
        let mut points = vec![4, 6];
        rebase(&mut points, &[2, 3]);
        assert_eq!(points, vec![4, 6]);

        let mut points = vec![6, 8];
        rebase(&mut points, &[2, 3]);
        assert_eq!(points, vec![0, 2]);
    }

    #[test]
    fn test_rebase_uniform_band() {
        // M = 4; all within [5, 9], band below max holds only 5
        let mut points = vec![5, 9, 5];
        rebase(&mut points, &[4, 2]);
        assert_eq!(points, vec![1, 5, 1]);
    }

    #[test]
    fn test_rebase_skips_mixed_band() {
        let mut points = vec![5, 6, 9];
        rebase(&mut points, &[4, 2]);
        assert_eq!(points, vec![5, 6, 9]);
    }

    #[test]
    fn test_equal_weights_visit_round_robin() {
        let mut max_seen = 0;
        let mut points = vec![0u64; 4];
        let weights = [3u32; 4];
        let mut counts = [0u64; 4];
        for _ in 0..1000 {
            let next = (0..4).min_by_key(|i| (points[*i], *i)).unwrap();
            points[next] += 3;
            counts[next] += 1;
            rebase(&mut points, &weights);
            max_seen = max_seen.max(*points.iter().max().unwrap());
            let lo = counts.iter().min().unwrap();
            let hi = counts.iter().max().unwrap();
            assert!(hi - lo <= 1, "counts diverged: {counts:?}");
        }
        assert!(max_seen <= 3);
    }

    #[test]
    fn test_two_to_one_weights_stay_bounded() {
        let mut max_seen = 0;
        let counts = simulate(&[1, 2], 3000, &mut max_seen);
        assert_eq!(counts, vec![2000, 1000]);
        assert!(max_seen <= 2);
    }

    #[test]
    fn test_long_run_credit_matches_weights() {
        // Service credit of every tag stays within one max weight of the
        // others, whether or not the re-basing rules fire.
        let weights = [1u32, 2, 3, 5, 7];
        let mut max_seen = 0;
        let counts = simulate(&weights, 20_000, &mut max_seen);

        let credit: Vec<u64> = counts
            .iter()
            .zip(weights)
            .map(|(c, w)| c * u64::from(w))
            .collect();
        let lo = credit.iter().min().unwrap();
        let hi = credit.iter().max().unwrap();
        assert!(hi - lo <= 7, "credit diverged: {credit:?}");
    }
}
