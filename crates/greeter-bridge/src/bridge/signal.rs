use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tonic::Status;

/// How a stream ended, as reported by its terminal callback.
#[derive(Clone, Debug)]
pub enum Termination {
    Completed,
    Errored(Status),
    /// The caller stopped waiting at its deadline before the stream ended.
    Abandoned,
}

/// One-shot latch fired by a stream's terminal event and awaited, with a
/// timeout, by the blocking caller.
///
/// The latch moves from pending to fired exactly once and never back. Only
/// the first [`fire`](Self::fire) is recorded; later calls are no-ops, so the
/// `on_error`/`on_completed` pair can both race to fire without corrupting
/// waiters.
///
/// Firing and waiting go through the same mutex, so everything the firing
/// thread wrote before [`fire`](Self::fire) is visible to the thread that
/// observes the fired state.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    state: Mutex<Option<Termination>>,
    fired: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the latch with `termination` and wakes every waiter.
    ///
    /// Returns `true` if this call fired the latch, `false` if it had already
    /// been fired (in which case nothing changes).
    pub fn fire(&self, termination: Termination) -> bool {
        let mut state = self.state.lock();
        if state.is_some() {
            return false;
        }
        *state = Some(termination);
        drop(state);

        self.fired.notify_all();
        true
    }

    /// Blocks until the latch fires or `timeout` elapses.
    ///
    /// Returns the recorded termination when fired, `None` on timeout.
    pub fn wait_up_to(&self, timeout: Duration) -> Option<Termination> {
        let mut state = self.state.lock();

        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while state.is_none() {
                    if self.fired.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
            // Unrepresentable deadline, wait for as long as it takes.
            None => {
                while state.is_none() {
                    self.fired.wait(&mut state);
                }
            }
        }

        state.clone()
    }

    pub fn is_fired(&self) -> bool {
        self.state.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    };
    use std::thread;

    #[test]
    fn only_the_first_fire_is_recorded() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_fired());

        assert!(signal.fire(Termination::Completed));
        assert!(!signal.fire(Termination::Errored(Status::internal("late"))));
        assert!(signal.is_fired());

        assert!(matches!(
            signal.wait_up_to(Duration::ZERO),
            Some(Termination::Completed)
        ));
    }

    #[test]
    fn wait_times_out_when_never_fired() {
        let signal = CompletionSignal::new();
        let start = Instant::now();

        assert!(signal.wait_up_to(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!signal.is_fired());
    }

    #[test]
    fn waiter_wakes_when_fired_from_another_thread() {
        let signal = Arc::new(CompletionSignal::new());
        let firing = Arc::clone(&signal);

        let firer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            firing.fire(Termination::Errored(Status::unavailable("gone")))
        });

        let start = Instant::now();
        let termination = signal.wait_up_to(Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(firer.join().unwrap());

        match termination {
            Some(Termination::Errored(status)) => {
                assert_eq!(status.code(), tonic::Code::Unavailable);
            }
            other => panic!("expected an errored termination, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_fires_succeed_exactly_once() {
        const THREADS: usize = 8;

        let signal = Arc::new(CompletionSignal::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let winners = Arc::new(AtomicUsize::new(0));

        thread::scope(|s| {
            for i in 0..THREADS {
                let signal = Arc::clone(&signal);
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                s.spawn(move || {
                    barrier.wait();
                    let termination = if i % 2 == 0 {
                        Termination::Completed
                    } else {
                        Termination::Errored(Status::internal("boom"))
                    };
                    if signal.fire(termination) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(signal.wait_up_to(Duration::ZERO).is_some());
    }

    #[test]
    fn every_waiter_is_released() {
        const WAITERS: usize = 4;

        let signal = Arc::new(CompletionSignal::new());
        let released = thread::scope(|s| {
            let handles: Vec<_> = (0..WAITERS)
                .map(|_| {
                    let signal = Arc::clone(&signal);
                    s.spawn(move || signal.wait_up_to(Duration::from_secs(10)).is_some())
                })
                .collect();

            thread::sleep(Duration::from_millis(20));
            signal.fire(Termination::Completed);

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|fired| *fired)
                .count()
        });

        assert_eq!(released, WAITERS);
    }

    #[test]
    fn huge_timeout_still_returns_once_fired() {
        let signal = Arc::new(CompletionSignal::new());
        let firing = Arc::clone(&signal);
        let firer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            firing.fire(Termination::Completed);
        });

        assert!(signal.wait_up_to(Duration::MAX).is_some());
        firer.join().unwrap();
    }
}
