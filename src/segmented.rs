//! Parallel segmented sieve.
//!
//! `[1, limit]` is cut into segments of `isqrt(limit)` numbers. Segment 0 is
//! exactly `[1, isqrt(limit)]`, which the flat sieve already answers while
//! producing the base primes, so those base primes seed the result and
//! workers start at segment 1.
//!
//! ```text
//! segment s  =  [len * s + 1, min(len * (s + 1), limit)]
//!
//!  dispatcher ──acquire slot──► worker s ── mark (parallel) ──► wait gate s
//!                                                              │
//!                         commit survivors to results ◄────────┘
//!                         release slot, raise gate s + 1, return buffer
//! ```
//!
//! Marking runs fully in parallel; commits are chained through the ordering
//! gates, so the shared result vector only ever grows in ascending order.

use parking_lot::Mutex;
use std::thread;

use crate::gate::{ConcurrencyGate, OrderingGates, Permit};
use crate::pool::SegmentPool;
use crate::primes::{find_primes_flat, prime_count_estimate};

struct SegmentedSieve<'a> {
    limit: u64,
    segment_len: u64,
    base_primes: &'a [u64],
    pool: SegmentPool,
    handoff: OrderingGates,
    results: Mutex<Vec<u64>>,
}

impl SegmentedSieve<'_> {
    fn bounds(&self, segment: u64) -> (u64, u64) {
        let low = self.segment_len * segment + 1;
        let high = low.saturating_add(self.segment_len - 1).min(self.limit);
        (low, high)
    }

    fn sieve_segment(&self, segment: u64, permit: Permit<'_>) {
        let index = segment as usize;
        let baton = self.handoff.baton(index);
        let (low, high) = self.bounds(segment);

        // composite[k] stands for the number low + k
        let mut composite = self.pool.acquire();

        for &p in self
            .base_primes
            .iter()
            .take_while(|&&p| p.checked_mul(p).is_some_and(|square| square <= high))
        {
            let Some(first) = low.div_ceil(p).checked_mul(p) else {
                continue;
            };
            let mut multiple = first.max(p * p);
            while multiple <= high {
                composite[(multiple - low) as usize] = true;
                match multiple.checked_add(p) {
                    Some(next) => multiple = next,
                    None => break,
                }
            }
        }

        self.handoff.wait(index);

        let span = (high - low + 1) as usize;
        let committed = {
            let mut results = self.results.lock();
            let before = results.len();
            results.extend(
                composite[..span]
                    .iter()
                    .enumerate()
                    .filter(|&(_, &is_composite)| !is_composite)
                    .map(|(k, _)| low + k as u64),
            );
            results.len() - before
        };
        log::trace!(
            "segment {} [{}, {}] committed {} primes",
            segment,
            low,
            high,
            committed
        );

        drop(permit);
        drop(baton);
        self.pool.release(composite);
    }
}

/// Segmented Sieve of Eratosthenes with ordered parallel commits
///
/// - Memory: base primes plus one `isqrt(limit)` buffer per in-flight worker
/// - Base primes up to `isqrt(limit)` come from the flat sieve
/// - One task per segment, at most `workers` in flight
/// - Buffers are recycled through a [`SegmentPool`]
/// - Commits are serialized in segment order by [`OrderingGates`]
pub fn find_primes_segmented(limit: u64, workers: usize) -> Vec<u64> {
    if limit < 2 {
        return vec![];
    }

    let segment_len = limit.isqrt();
    let base_primes = find_primes_flat(segment_len, workers);
    let segment_count = limit.div_ceil(segment_len);

    let mut results = Vec::with_capacity(prime_count_estimate(limit));
    results.extend_from_slice(&base_primes);

    if segment_count <= 1 {
        return results;
    }

    let sieve = SegmentedSieve {
        limit,
        segment_len,
        base_primes: &base_primes,
        pool: SegmentPool::new(segment_len as usize),
        handoff: OrderingGates::new(segment_count as usize),
        results: Mutex::new(results),
    };
    let gate = ConcurrencyGate::new(workers);

    log::debug!(
        "segmented sieve: limit={} segment_len={} segments={} base_primes={} workers={}",
        limit,
        segment_len,
        segment_count,
        base_primes.len(),
        gate.limit()
    );

    thread::scope(|scope| {
        let sieve = &sieve;
        // Segment 0 was committed by seeding the base primes
        sieve.handoff.signal(1);

        for segment in 1..segment_count {
            let permit = gate.acquire();
            scope.spawn(move || sieve.sieve_segment(segment, permit));
        }
        gate.drain();
    });

    log::debug!(
        "segmented sieve: {} buffers of {} flags allocated for {} segments",
        sieve.pool.allocated(),
        sieve.pool.segment_len(),
        segment_count - 1
    );

    sieve.results.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primes::tests::is_prime_by_trial_division;
    use proptest::prelude::*;

    fn assert_strictly_ascending(primes: &[u64]) {
        assert!(
            primes.windows(2).all(|w| w[0] < w[1]),
            "sequence is not strictly ascending"
        );
    }

    #[test]
    fn boundaries() {
        assert_eq!(find_primes_segmented(0, 4), Vec::<u64>::new());
        assert_eq!(find_primes_segmented(1, 4), Vec::<u64>::new());
        assert_eq!(find_primes_segmented(2, 4), vec![2]);
        assert_eq!(find_primes_segmented(3, 4), vec![2, 3]);
        assert_eq!(find_primes_segmented(4, 4), vec![2, 3]);
        assert_eq!(find_primes_segmented(10, 4), vec![2, 3, 5, 7]);
    }

    #[test]
    fn known_counts() {
        assert_eq!(find_primes_segmented(100, 4).len(), 25);
        assert_eq!(find_primes_segmented(10_000, 4).len(), 1229);
        assert_eq!(find_primes_segmented(1_000_000, 8).len(), 78_498);
    }

    #[test]
    fn matches_flat_sieve_on_reference_limits() {
        for limit in [0, 1, 2, 3, 10, 100, 10_000, 10_000_001] {
            let flat = find_primes_flat(limit, 4);
            let segmented = find_primes_segmented(limit, 4);
            assert_eq!(flat, segmented, "mismatch for limit {}", limit);
            assert_strictly_ascending(&segmented);
        }
    }

    #[test]
    fn partial_last_segment_stays_within_limit() {
        // isqrt does not divide any of these, so the last segment is partial
        for limit in [11, 101, 1_000_003, 999_983] {
            let primes = find_primes_segmented(limit, 3);
            assert!(primes.last().is_some_and(|&p| p <= limit));
            assert_eq!(primes, find_primes_flat(limit, 3), "limit {}", limit);
        }
        assert_eq!(find_primes_segmented(101, 2).last(), Some(&101));
        assert_eq!(find_primes_segmented(999_983, 2).last(), Some(&999_983));
    }

    #[test]
    fn seeded_and_dispatched_ranges_meet_exactly() {
        // Limits whose isqrt is itself prime put a base prime on the seam
        for limit in [49, 50, 121, 169, 170, 361, 529] {
            let primes = find_primes_segmented(limit, 2);
            let expected: Vec<u64> = (0..=limit).filter(|&n| is_prime_by_trial_division(n)).collect();
            assert_eq!(primes, expected, "limit {}", limit);
        }
    }

    #[test]
    fn every_output_survives_trial_division() {
        let primes = find_primes_segmented(60_000, 4);
        let expected: Vec<u64> = (0..=60_000).filter(|&n| is_prime_by_trial_division(n)).collect();
        assert_eq!(primes, expected);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let first = find_primes_segmented(500_000, 4);
        let second = find_primes_segmented(500_000, 4);
        assert_eq!(first, second);
    }

    #[test]
    fn ordering_holds_under_any_worker_limit() {
        // ~700 segments of ~700 numbers each
        let limit = 490_001;
        let reference = find_primes_flat(limit, 1);
        for workers in [1, 2, 3, 8, 64, 1024] {
            for _ in 0..3 {
                let primes = find_primes_segmented(limit, workers);
                assert_eq!(primes, reference, "workers {}", workers);
            }
        }
    }

    #[test]
    fn segment_buffers_are_recycled() {
        let limit: u64 = 4_000_000; // 1999 dispatched segments
        let segment_len = limit.isqrt();
        let base_primes = find_primes_flat(segment_len, 2);
        let sieve = SegmentedSieve {
            limit,
            segment_len,
            base_primes: &base_primes,
            pool: SegmentPool::new(segment_len as usize),
            handoff: OrderingGates::new(limit.div_ceil(segment_len) as usize),
            results: Mutex::new(Vec::new()),
        };
        let gate = ConcurrencyGate::new(2);
        thread::scope(|scope| {
            let sieve = &sieve;
            sieve.handoff.signal(1);
            for segment in 1..limit.div_ceil(segment_len) {
                let permit = gate.acquire();
                scope.spawn(move || sieve.sieve_segment(segment, permit));
            }
            gate.drain();
        });
        assert!(sieve.pool.allocated() < 100, "allocated {}", sieve.pool.allocated());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn agrees_with_flat_sieve(limit in 0u64..80_000, workers in 1usize..9) {
            let segmented = find_primes_segmented(limit, workers);
            prop_assert_eq!(&segmented, &find_primes_flat(limit, workers));
            prop_assert!(segmented.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(segmented.iter().all(|&p| p <= limit));
        }
    }
}
