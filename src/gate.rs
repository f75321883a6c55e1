use parking_lot::{Condvar, Mutex};

/// Counting gate that bounds how many worker tasks are in flight at once.
///
/// The dispatching loop calls [`acquire`](ConcurrencyGate::acquire) before it
/// spawns a task and blocks while `limit` tasks are already running. The task
/// gives its slot back by dropping the returned [`Permit`].
pub struct ConcurrencyGate {
    in_flight: Mutex<usize>,
    released: Condvar,
    limit: usize,
}

/// One occupied slot of a [`ConcurrencyGate`]. Released on drop.
pub struct Permit<'a> {
    gate: &'a ConcurrencyGate,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        Self {
            in_flight: Mutex::new(0),
            released: Condvar::new(),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn acquire(&self) -> Permit<'_> {
        let mut in_flight = self.in_flight.lock();
        while *in_flight >= self.limit {
            self.released.wait(&mut in_flight);
        }
        *in_flight += 1;
        Permit { gate: self }
    }

    /// Blocks until every outstanding permit has been released.
    pub fn drain(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.released.wait(&mut in_flight);
        }
    }

    fn release(&self) {
        let mut in_flight = self.in_flight.lock();
        debug_assert!(*in_flight > 0, "permit released twice");
        *in_flight -= 1;
        // Both the dispatcher (acquire) and drain() may be parked here
        self.released.notify_all();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Single-use, single-signal latch.
struct Signal {
    raised: Mutex<bool>,
    ready: Condvar,
}

impl Signal {
    fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    fn raise(&self) {
        let mut raised = self.raised.lock();
        debug_assert!(!*raised, "ordering gate signaled twice");
        *raised = true;
        self.ready.notify_one();
    }

    fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.ready.wait(&mut raised);
        }
    }
}

/// Arena of ordering gates, one per segment index.
///
/// Gate `s` is raised exactly once, by whoever finished committing segment
/// `s - 1`, and waited on exactly once, by the worker for segment `s`. Passing
/// this baton down the chain serializes commits in ascending segment order.
pub struct OrderingGates {
    gates: Box<[Signal]>,
}

impl OrderingGates {
    pub fn new(count: usize) -> Self {
        Self {
            gates: (0..count).map(|_| Signal::new()).collect(),
        }
    }

    /// Blocks until gate `index` has been raised. Indices past the end are
    /// treated as already open.
    pub fn wait(&self, index: usize) {
        if let Some(gate) = self.gates.get(index) {
            gate.wait();
        }
    }

    /// Raises gate `index`. Raising past the end is a no-op, which is what the
    /// last segment does.
    pub fn signal(&self, index: usize) {
        if let Some(gate) = self.gates.get(index) {
            gate.raise();
        }
    }

    /// Returns a guard that raises gate `index + 1` when dropped, so a worker
    /// that unwinds still hands the baton to its successor.
    pub fn baton(&self, index: usize) -> Baton<'_> {
        Baton {
            gates: self,
            next: index + 1,
        }
    }
}

pub struct Baton<'a> {
    gates: &'a OrderingGates,
    next: usize,
}

impl Drop for Baton<'_> {
    fn drop(&mut self) {
        self.gates.signal(self.next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn gate_never_exceeds_limit() {
        let gate = ConcurrencyGate::new(3);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..32 {
                let permit = gate.acquire();
                let (running, peak) = (&running, &peak);
                scope.spawn(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    running.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                });
            }
            gate.drain();
            assert_eq!(running.load(Ordering::SeqCst), 0);
        });

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak in-flight was {}", peak);
    }

    #[test]
    fn zero_limit_behaves_as_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.limit(), 1);
        let permit = gate.acquire();
        drop(permit);
        gate.drain();
    }

    #[test]
    fn drain_on_idle_gate_returns_immediately() {
        ConcurrencyGate::new(4).drain();
    }

    #[test]
    fn baton_serializes_reverse_started_threads() {
        let count = 16;
        let gates = OrderingGates::new(count + 1);
        let order = Mutex::new(Vec::new());

        thread::scope(|scope| {
            // Start the highest index first so any ordering comes from the gates
            for index in (1..=count).rev() {
                let (gates, order) = (&gates, &order);
                scope.spawn(move || {
                    let _baton = gates.baton(index);
                    gates.wait(index);
                    order.lock().push(index);
                });
            }
            gates.signal(1);
        });

        let expected: Vec<usize> = (1..=count).collect();
        assert_eq!(order.into_inner(), expected);
    }

    #[test]
    fn out_of_range_indices_are_open() {
        let gates = OrderingGates::new(2);
        gates.wait(5);
        gates.signal(5);
    }
}
