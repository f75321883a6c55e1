use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::gate::ConcurrencyGate;
use crate::segmented;

// Limits above this use the segmented sieve when the algorithm is `Auto`
pub const DEFAULT_SEGMENTED_THRESHOLD: u64 = 10_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Algorithm {
    /// Flat sieve up to the threshold, segmented sieve above it
    Auto,
    Flat,
    Segmented,
}

impl Algorithm {
    /// Resolves `Auto` against `threshold`; explicit choices pass through.
    pub fn resolve(self, limit: u64, threshold: u64) -> Algorithm {
        match self {
            Algorithm::Auto if limit <= threshold => Algorithm::Flat,
            Algorithm::Auto => Algorithm::Segmented,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Auto => "auto",
            Algorithm::Flat => "flat",
            Algorithm::Segmented => "segmented",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SieveConfig {
    /// Upper bound on concurrently running worker tasks
    pub workers: usize,
    pub threshold: u64,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            threshold: DEFAULT_SEGMENTED_THRESHOLD,
        }
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub fn find_primes(limit: u64, algorithm: Algorithm, config: &SieveConfig) -> Vec<u64> {
    match algorithm.resolve(limit, config.threshold) {
        Algorithm::Segmented => segmented::find_primes_segmented(limit, config.workers),
        _ => find_primes_flat(limit, config.workers),
    }
}

/// Capacity hint for a result vector holding the primes up to `limit`.
pub fn prime_count_estimate(limit: u64) -> usize {
    if limit < 64 {
        return 18;
    }
    let x = limit as f64;
    (x / (x.ln() - 1.1)) as usize
}

/// Marks every odd multiple of `p` from `p * p` up to `max` as composite.
///
/// `composite[i]` stands for the odd number `2 * i + 1`. Smaller multiples of
/// `p` carry a smaller prime factor and are marked by that factor's pass.
///
/// Several passes may run against the same buffer at once. Flags only ever go
/// from `false` to `true`, so relaxed stores are enough.
pub fn mark_odd_multiples(composite: &[AtomicBool], p: u64, max: u64) {
    let Some(mut multiple) = p.checked_mul(p) else {
        return;
    };
    let step = 2 * p;

    while multiple <= max {
        composite[(multiple / 2) as usize].store(true, Ordering::Relaxed);
        match multiple.checked_add(step) {
            Some(next) => multiple = next,
            None => break,
        }
    }
}

/// Flat Sieve of Eratosthenes over odd numbers
///
/// One occupancy buffer covers the whole range.
/// - Memory: one flag per odd number, `limit / 2 + 1` flags
/// - Index mapping: `composite[i]` represents the number `2 * i + 1`
/// - Each unmarked odd candidate up to sqrt(limit) gets its own marking task
/// - At most `workers` marking tasks are in flight at once
///
/// The unmarked check before dispatch races with tasks still marking, so a
/// composite candidate can occasionally get its own pass. That only repeats
/// writes that were going to happen anyway.
pub fn find_primes_flat(limit: u64, workers: usize) -> Vec<u64> {
    if limit < 2 {
        return vec![];
    }
    if limit == 2 {
        return vec![2];
    }

    let len = usize::try_from(limit / 2 + 1).unwrap_or(usize::MAX);
    let composite: Vec<AtomicBool> = (0..len).map(|_| AtomicBool::new(false)).collect();

    let sqrt_limit = limit.isqrt();
    let gate = ConcurrencyGate::new(workers);
    let mut dispatched = 0usize;

    thread::scope(|scope| {
        let composite = &composite[..];
        for p in (3..=sqrt_limit).step_by(2) {
            if composite[(p / 2) as usize].load(Ordering::Relaxed) {
                continue;
            }
            let permit = gate.acquire();
            scope.spawn(move || {
                mark_odd_multiples(composite, p, limit);
                drop(permit);
            });
            dispatched += 1;
        }
        gate.drain();
    });

    log::debug!(
        "flat sieve: limit={} sqrt={} marking_tasks={} workers={}",
        limit,
        sqrt_limit,
        dispatched,
        gate.limit()
    );

    let mut primes = Vec::with_capacity(prime_count_estimate(limit));
    primes.push(2);
    primes.extend(
        composite
            .into_iter()
            .map(AtomicBool::into_inner)
            .enumerate()
            .skip(1) // index 0 is the number 1
            .filter(|&(_, is_composite)| !is_composite)
            .map(|(i, _)| 2 * i as u64 + 1)
            .take_while(|&num| num <= limit),
    );

    primes
}
