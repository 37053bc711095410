use std::time::Duration;
use tokio::time::Instant;

/// Session stopwatch.
///
/// Callers pass the current instant so the service loop and tests share one
/// clock.
#[derive(Debug, Default, Clone)]
pub struct Stopwatch {
    started_at: Option<Instant>,
    accumulated: Duration,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking from the accumulated baseline.
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
    }

    pub fn pause(&mut self, now: Instant) {
        self.accumulated = self.elapsed(now);
        self.started_at = None;
    }

    pub fn resume(&mut self, now: Instant) {
        self.start(now);
    }

    pub fn stop(&mut self) {
        self.started_at = None;
        self.accumulated = Duration::ZERO;
    }

    pub fn is_ticking(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let live = self
            .started_at
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        self.accumulated + live
    }

    /// Elapsed time rounded to the nearest second.
    pub fn elapsed_seconds(&self, now: Instant) -> u64 {
        self.elapsed(now).as_secs_f64().round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_pauses_and_resumes() {
        let t0 = Instant::now();
        let mut watch = Stopwatch::new();
        watch.start(t0);

        assert_eq!(watch.elapsed_seconds(t0 + Duration::from_millis(2400)), 2);
        assert_eq!(watch.elapsed_seconds(t0 + Duration::from_millis(2600)), 3);

        watch.pause(t0 + Duration::from_secs(10));
        assert!(!watch.is_ticking());
        // Time spent paused does not count.
        assert_eq!(watch.elapsed_seconds(t0 + Duration::from_secs(100)), 10);

        watch.resume(t0 + Duration::from_secs(100));
        assert_eq!(watch.elapsed_seconds(t0 + Duration::from_secs(105)), 15);
    }

    #[test]
    fn test_stop_zeroes() {
        let t0 = Instant::now();
        let mut watch = Stopwatch::new();
        watch.start(t0);
        watch.pause(t0 + Duration::from_secs(30));
        watch.stop();

        assert_eq!(watch.elapsed(t0 + Duration::from_secs(60)), Duration::ZERO);
        assert!(!watch.is_ticking());
    }
}
