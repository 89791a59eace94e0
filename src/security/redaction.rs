//! Scrubbing of secret values from subprocess output

use aho_corasick::{AhoCorasick, MatchKind};
use std::fmt;

use crate::core::traits::{Invocation, MASK};

/// Replaces every occurrence of a fixed set of secrets with `****`
///
/// # Examples
///
/// ```
/// use aptly_publisher::security::Redactor;
///
/// let redactor = Redactor::new(&["hunter2"]);
/// assert_eq!(redactor.redact("passphrase hunter2 rejected"), "passphrase **** rejected");
/// ```
#[derive(Clone, Default)]
pub struct Redactor {
    matcher: Option<AhoCorasick>,
    /// Used when the automaton cannot be built
    patterns: Vec<String>,
}

impl Redactor {
    pub fn new<S: AsRef<str>>(secrets: &[S]) -> Self {
        let mut patterns: Vec<String> = secrets
            .iter()
            .map(|secret| secret.as_ref().to_string())
            .filter(|secret| !secret.is_empty())
            .collect();
        patterns.sort();
        patterns.dedup();

        if patterns.is_empty() {
            return Self::default();
        }

        // Leftmost-longest so a secret that contains another is masked whole
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
            .ok();

        Self { matcher, patterns }
    }

    /// Redactor for every sensitive argument of a command
    pub fn for_invocation(invocation: &Invocation) -> Self {
        Self::new(&invocation.secrets())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn redact(&self, text: &str) -> String {
        if let Some(matcher) = &self.matcher {
            let replacements = vec![MASK; matcher.patterns_len()];
            return matcher.replace_all(text, &replacements);
        }

        // Longest first, mirroring the automaton's match preference
        let mut patterns: Vec<&String> = self.patterns.iter().collect();
        patterns.sort_by_key(|pattern| std::cmp::Reverse(pattern.len()));
        patterns
            .into_iter()
            .fold(text.to_string(), |acc, pattern| acc.replace(pattern.as_str(), MASK))
    }
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("patterns", &self.patterns.len())
            .finish()
    }
}
