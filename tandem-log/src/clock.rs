//! Injectable time sources.
//!
//! The log consumes time only through the [`Clock`] trait so that id
//! generation and skew correction are deterministic under test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A millisecond wallclock.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// The process wallclock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A deterministic clock for tests.
///
/// Yields `1, 2, 3, …` by default, or a scripted sequence; once a script is
/// exhausted the clock keeps counting from the last scripted value. Clones
/// share the same underlying counter, so several logs can be driven from one
/// time source.
#[derive(Debug, Clone, Default)]
pub struct TestTime {
    inner: Arc<Mutex<TestTimeInner>>,
}

#[derive(Debug, Default)]
struct TestTimeInner {
    script: VecDeque<i64>,
    last: i64,
}

impl TestTime {
    /// A clock counting `1, 2, 3, …`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock yielding the given values first, then counting onwards.
    pub fn sequence<I: IntoIterator<Item = i64>>(values: I) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TestTimeInner {
                script: values.into_iter().collect(),
                last: 0,
            })),
        }
    }

    /// Advance the clock and return the new time.
    pub fn next(&self) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.last = match inner.script.pop_front() {
            Some(value) => value,
            None => inner.last + 1,
        };
        inner.last
    }
}

impl Clock for TestTime {
    fn now(&self) -> i64 {
        self.next()
    }
}
