use std::time::Instant;

use super::circular_buffer::CircularBuffer;
use super::types::SessionStats;

const MAX_RECENT_ERRORS: usize = 100;
const MAX_ERROR_TEXT_BYTES: usize = 1024;

#[derive(Debug, Clone)]
struct ErrorRec {
    _timestamp: Instant,
    context: &'static str,
    error: String,
}

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Counters and a bounded error log for one connection session.
#[derive(Debug)]
pub struct SessionHealth {
    opened_at: Option<Instant>,
    stats: SessionStats,
    recent_errors: CircularBuffer<ErrorRec>,
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHealth {
    pub fn new() -> Self {
        Self {
            opened_at: None,
            stats: SessionStats::default(),
            recent_errors: CircularBuffer::new(MAX_RECENT_ERRORS),
        }
    }

    pub fn record_connect(&mut self) {
        self.stats.connects = self.stats.connects.saturating_add(1);
    }

    pub fn record_open(&mut self) {
        self.opened_at = Some(Instant::now());
        self.stats.opens = self.stats.opens.saturating_add(1);
    }

    pub fn record_down(&mut self) {
        self.opened_at = None;
    }

    pub fn record_frame(&mut self) {
        self.stats.frames = self.stats.frames.saturating_add(1);
    }

    pub fn record_value(&mut self) {
        self.stats.values = self.stats.values.saturating_add(1);
    }

    pub fn record_decode_failure(&mut self, error: &str) {
        self.stats.decode_failures = self.stats.decode_failures.saturating_add(1);
        self.push_error("decode", error);
    }

    pub fn record_transport_error(&mut self, context: &'static str, error: &str) {
        self.stats.transport_errors = self.stats.transport_errors.saturating_add(1);
        self.push_error(context, error);
    }

    pub fn record_unexpected_close(&mut self, reason: &str) {
        self.stats.unexpected_closes = self.stats.unexpected_closes.saturating_add(1);
        self.push_error("close", reason);
    }

    pub fn record_retry_scheduled(&mut self) {
        self.stats.retries_scheduled = self.stats.retries_scheduled.saturating_add(1);
    }

    pub fn record_retry_suppressed(&mut self) {
        self.stats.retries_suppressed = self.stats.retries_suppressed.saturating_add(1);
    }

    /// Most recent error as `(context, message)`.
    pub fn last_error(&self) -> Option<(&'static str, &str)> {
        self.recent_errors
            .back()
            .map(|rec| (rec.context, rec.error.as_str()))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            recent_errors: self.recent_errors.len(),
            uptime: self.opened_at.map(|at| at.elapsed()),
            ..self.stats.clone()
        }
    }

    fn push_error(&mut self, context: &'static str, error: &str) {
        self.recent_errors.push(ErrorRec {
            _timestamp: Instant::now(),
            context,
            error: truncate_string(error),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_is_bounded() {
        let mut health = SessionHealth::new();
        for i in 0..105 {
            health.record_decode_failure(&format!("bad-{i}"));
        }
        let stats = health.stats();
        assert_eq!(stats.decode_failures, 105);
        assert_eq!(stats.recent_errors, MAX_RECENT_ERRORS);
        assert_eq!(health.last_error(), Some(("decode", "bad-104")));
    }

    #[test]
    fn error_text_is_truncated_on_char_boundary() {
        let mut health = SessionHealth::new();
        let huge = "é".repeat(MAX_ERROR_TEXT_BYTES);
        health.record_transport_error("read", &huge);
        let (context, message) = health.last_error().unwrap();
        assert_eq!(context, "read");
        assert!(message.len() <= MAX_ERROR_TEXT_BYTES);
        assert!(message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn uptime_only_while_open() {
        let mut health = SessionHealth::new();
        assert!(health.stats().uptime.is_none());
        health.record_open();
        assert!(health.stats().uptime.is_some());
        health.record_down();
        assert!(health.stats().uptime.is_none());
        assert_eq!(health.stats().opens, 1);
    }
}
