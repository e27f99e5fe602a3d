//! Command handlers

pub mod config;
pub mod notification;
pub mod project;
pub mod session;
pub mod status;
pub mod sync;
pub mod task;

use anyhow::{bail, Result};

/// Resolve a full id or unique prefix among `(id, label)` candidates
pub(crate) fn resolve_id<'a>(
    what: &str,
    input: &str,
    candidates: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<String> {
    let mut matches: Vec<(&str, &str)> = Vec::new();
    for (id, label) in candidates {
        if id == input {
            return Ok(id.to_string());
        }
        if id.starts_with(input) {
            matches.push((id, label));
        }
    }

    match matches.len() {
        0 => bail!("No {} found matching: {}", what, input),
        1 => Ok(matches[0].0.to_string()),
        _ => {
            eprintln!("Multiple {}s match '{}':", what, input);
            for (id, label) in &matches {
                eprintln!("  {} - {}", id, label);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_id() {
        let items = [("abc123", "first"), ("abd456", "second")];

        assert_eq!(resolve_id("task", "abc", items).unwrap(), "abc123");
        assert_eq!(resolve_id("task", "abd456", items).unwrap(), "abd456");
        assert!(resolve_id("task", "ab", items).is_err());
        assert!(resolve_id("task", "zz", items).is_err());
    }
}
