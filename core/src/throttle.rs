use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A time-gated callback: `do_call` invokes its action at most once per
/// interval and returns immediately otherwise
pub struct Throttle {
    interval: Duration,
    last_call: Mutex<Option<Instant>>
}

impl Throttle {
    /// Creates a throttle with the given minimum interval between calls
    ///
    /// The first `do_call` always fires.
    pub fn new(interval: Duration) -> Throttle {
        Throttle {
            interval,
            last_call: Mutex::new(None)
        }
    }

    /// Runs `action` if the interval has elapsed since the last run
    pub fn do_call<F: FnOnce()>(&self, action: F) {
        let mut last_call = self.last_call.lock().unwrap();
        let due = match *last_call {
            Some(last) => last.elapsed() >= self.interval,
            None => true
        };
        if due {
            *last_call = Some(Instant::now());
            action();
        }
    }
}
