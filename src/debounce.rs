// ABOUTME: Time-gated action runner used to keep repeated log lines quiet
// ABOUTME: Runs a closure at most once per configured delay window
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Das Hügel Project

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Runs an action at most once per `delay`.
///
/// Admission denials arrive in bursts (every queued job hits the same closed
/// gate), so the rate-limit error log goes through one of these.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl Debouncer {
    /// New debouncer that allows one run per `delay`.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
        }
    }

    /// Run `f` unless it already ran within the delay window.
    pub fn debounce<F: FnOnce()>(&self, f: F) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if let Some(at) = *last {
            if at.elapsed() < self.delay {
                return;
            }
        }
        f();
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::Debouncer;
    use std::time::Duration;

    #[test]
    fn second_call_within_window_is_dropped() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let mut count = 0;
        debouncer.debounce(|| count += 1);
        debouncer.debounce(|| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn zero_delay_always_runs() {
        let debouncer = Debouncer::new(Duration::ZERO);
        let mut count = 0;
        debouncer.debounce(|| count += 1);
        debouncer.debounce(|| count += 1);
        assert_eq!(count, 2);
    }
}
