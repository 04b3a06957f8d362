//! Shared utility functions used across modules.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};

use crate::constants::MESSAGE_TIME_FORMAT;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Format a local timestamp for outgoing messages.
pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(MESSAGE_TIME_FORMAT).to_string()
}

/// Truncate a string to `max_len` characters, appending "..." if truncated.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    } else {
        s.chars().take(max_len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncate_short_string_unchanged() {
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn truncate_long_string() {
        assert_eq!(truncate_str("emergency alert body", 10), "emergen...");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_str("🚨🚨🚨🚨🚨", 4), "🚨...");
    }

    #[test]
    fn timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 18, 5, 7).unwrap();
        assert_eq!(format_timestamp(&at), "2024-03-09 18:05:07");
    }

    #[test]
    fn poisoned_lock_recovers() {
        let m = std::sync::Arc::new(Mutex::new(1));
        let m2 = std::sync::Arc::clone(&m);
        let _ = std::thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert_eq!(*lock(&m), 1);
    }
}
