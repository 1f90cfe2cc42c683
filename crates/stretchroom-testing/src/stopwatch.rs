//! Measure a scope and report it on drop.

use std::time::{Duration, Instant};

type OnElapsed = Box<dyn FnOnce(Duration) + Send>;

/// Calls its callback with the elapsed time when dropped.
///
/// ```
/// use std::sync::mpsc;
/// use stretchroom_testing::StopWatchElapser;
///
/// let (tx, rx) = mpsc::channel();
/// {
///     let _watch = StopWatchElapser::start(move |elapsed| tx.send(elapsed).unwrap());
/// }
/// assert!(rx.recv().is_ok());
/// ```
pub struct StopWatchElapser {
    started: Instant,
    on_elapsed: Option<OnElapsed>,
}

impl StopWatchElapser {
    pub fn start(on_elapsed: impl FnOnce(Duration) + Send + 'static) -> Self {
        Self {
            started: Instant::now(),
            on_elapsed: Some(Box::new(on_elapsed)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for StopWatchElapser {
    fn drop(&mut self) {
        if let Some(on_elapsed) = self.on_elapsed.take() {
            on_elapsed(self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_reports_elapsed_on_drop() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        {
            let watch = StopWatchElapser::start(move |d| *sink.lock().unwrap() = Some(d));
            std::thread::sleep(Duration::from_millis(20));
            assert!(watch.elapsed() >= Duration::from_millis(20));
            assert!(seen.lock().unwrap().is_none());
        }
        let elapsed = seen.lock().unwrap().expect("callback ran");
        assert!(elapsed >= Duration::from_millis(20));
    }
}
