//! Scan Window
//!
//! Tracks whether a scan is active and when it must be stopped. The service
//! loop sleeps until [`ScanWindow::deadline`] and stops the scan on expiry;
//! stopping early clears the deadline, which cancels the pending timeout.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct ScanWindow {
    deadline: Option<Instant>,
}

impl ScanWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or restart) the window.
    pub fn open(&mut self, now: Instant, timeout: Duration) {
        self.deadline = Some(now + timeout);
    }

    /// Close the window. Returns whether a scan was active.
    pub fn close(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_scanning(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_expiry() {
        let t0 = Instant::now();
        let mut window = ScanWindow::new();
        assert!(!window.is_scanning());
        assert!(!window.is_expired(t0));

        window.open(t0, Duration::from_secs(5));
        assert!(window.is_scanning());
        assert!(!window.is_expired(t0 + Duration::from_millis(4999)));
        assert!(window.is_expired(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_close_cancels_deadline() {
        let t0 = Instant::now();
        let mut window = ScanWindow::new();
        window.open(t0, Duration::from_secs(5));

        assert!(window.close());
        assert!(!window.close());
        assert_eq!(window.deadline(), None);
        assert!(!window.is_expired(t0 + Duration::from_secs(10)));
    }
}
