//! User-visible one-line advisories
//!
//! Used when an operation degrades to local-only, e.g. a delete while signed
//! in but offline. Presentation belongs to the front end.

use std::sync::Mutex;

use tracing::warn;

pub trait Advisory: Send + Sync {
    fn advise(&self, message: &str);
}

/// Sends advisories to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAdvisory;

impl Advisory for LogAdvisory {
    fn advise(&self, message: &str) {
        warn!(advisory = true, "{message}");
    }
}

/// Keeps advisories in memory so they can be shown later
#[derive(Debug, Default)]
pub struct CollectedAdvisories {
    messages: Mutex<Vec<String>>,
}

impl CollectedAdvisories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every advisory collected so far
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Advisory for CollectedAdvisories {
    fn advise(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collected_advisories_drain() {
        let advisories = CollectedAdvisories::new();
        advisories.advise("saved locally");
        advisories.advise("deleted locally");
        assert_eq!(advisories.len(), 2);

        assert_eq!(advisories.drain(), vec!["saved locally", "deleted locally"]);
        assert!(advisories.is_empty());
    }
}
