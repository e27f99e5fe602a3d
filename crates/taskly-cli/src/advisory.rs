//! Advisories printed to stderr
//!
//! Keeps stdout clean for `--json` and `--quiet` consumers.

use taskly_core::Advisory;

pub struct StderrAdvisory {
    quiet: bool,
}

impl StderrAdvisory {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Advisory for StderrAdvisory {
    fn advise(&self, message: &str) {
        if !self.quiet {
            eprintln!("⚠ {}", message);
        }
    }
}
