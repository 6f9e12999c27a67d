// In-memory request log ring - reset on process restart by design

use std::collections::VecDeque;

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;

const MAX_ENTRIES: usize = 500;

static GLOBAL: Lazy<RequestLog> = Lazy::new(|| RequestLog::new(MAX_ENTRIES));

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub timestamp: String,
    pub method: String,
    pub endpoint: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub status_code: u16,
    pub duration_ms: u64,
}

pub struct RequestLog {
    entries: Mutex<VecDeque<RequestLogEntry>>,
    cap: usize,
}

impl RequestLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    /// Record one completed API request; newest entries first, oldest
    /// dropped past the cap.
    pub fn add(&self, method: &str, endpoint: &str, model: &str, status_code: u16, duration_ms: u64) {
        let success = (200..300).contains(&status_code);
        let entry = RequestLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            kind: if success { "success" } else { "error" }.to_string(),
            message: if success {
                format!("Request completed ({}ms)", duration_ms)
            } else {
                format!("Error {}", status_code)
            },
            status_code,
            duration_ms,
        };

        let mut entries = self.entries.lock();
        entries.push_front(entry);
        while entries.len() > self.cap {
            entries.pop_back();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<RequestLogEntry> {
        self.entries.lock().iter().take(limit).cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

pub fn add(method: &str, endpoint: &str, model: &str, status_code: u16, duration_ms: u64) {
    GLOBAL.add(method, endpoint, model, status_code, duration_ms);
}

pub fn recent(limit: usize) -> Vec<RequestLogEntry> {
    GLOBAL.recent(limit)
}

pub fn clear() {
    GLOBAL.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entries_come_first_and_the_ring_is_capped() {
        let log = RequestLog::new(5);
        for i in 0..8 {
            log.add("POST", "/v1/chat/completions", &format!("model-{}", i), 200, 12);
        }
        let entries = log.recent(10);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].model, "model-7");
        assert_eq!(entries[4].model, "model-3");
        assert_eq!(entries[0].kind, "success");
    }

    #[test]
    fn error_statuses_are_classified() {
        let log = RequestLog::new(5);
        log.add("POST", "/v1/chat/completions", "gpt-4o", 429, 3);
        let entries = log.recent(1);
        assert_eq!(entries[0].kind, "error");
        assert_eq!(entries[0].message, "Error 429");
    }
}
