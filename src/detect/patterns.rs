//! Compiled pattern catalogs shared by the regex detectors.
//!
//! Catalogs are built once at startup and shared by reference; scanning is
//! read-only. Patterns with a literal prefix are pre-filtered through an
//! Aho-Corasick automaton so clean payloads skip most of the regex work.

use aho_corasick::AhoCorasick;
use regex::Regex;

use crate::detect::Deadline;

/// One named pattern with the confidence it reports when matched.
pub struct ScanPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub confidence: f64,
}

impl ScanPattern {
    fn new(name: &'static str, pattern: &str, confidence: f64) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).unwrap(),
            confidence,
        }
    }
}

/// Outcome of scanning a text against a catalog.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Names of the patterns that matched, in catalog order.
    pub matched: Vec<&'static str>,
    /// Highest confidence among the matches, 0.0 when none matched.
    pub confidence: f64,
}

impl ScanOutcome {
    pub fn is_clean(&self) -> bool {
        self.matched.is_empty()
    }
}

/// An immutable set of compiled patterns.
pub struct PatternCatalog {
    patterns: Vec<ScanPattern>,
    /// Quick-elimination automaton over literal regex prefixes.
    prefilter: Option<AhoCorasick>,
    /// (prefix, pattern index) pairs backing the prefilter.
    prefixed: Vec<(String, usize)>,
}

impl PatternCatalog {
    pub fn new(patterns: Vec<ScanPattern>) -> Self {
        let mut prefixed = Vec::new();
        for (idx, pattern) in patterns.iter().enumerate() {
            if let Some(prefix) = literal_prefix(pattern.regex.as_str())
                && prefix.len() >= 3
            {
                prefixed.push((prefix, idx));
            }
        }
        let prefilter = if prefixed.is_empty() {
            None
        } else {
            let strings: Vec<&str> = prefixed.iter().map(|(s, _)| s.as_str()).collect();
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&strings)
                .ok()
        };
        Self {
            patterns,
            prefilter,
            prefixed,
        }
    }

    /// Scan `text`, checking the deadline between patterns.
    ///
    /// On deadline expiry the partial outcome is returned; a detector that
    /// ran out of time reports whatever it matched so far.
    pub fn scan(&self, text: &str, deadline: &Deadline) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        for idx in self.candidate_indices(text) {
            if deadline.expired() {
                break;
            }
            let pattern = &self.patterns[idx];
            if pattern.regex.is_match(text) {
                outcome.matched.push(pattern.name);
                if pattern.confidence > outcome.confidence {
                    outcome.confidence = pattern.confidence;
                }
            }
        }
        outcome
    }

    /// Pattern indices worth running: all non-prefixed patterns, plus
    /// prefixed ones whose literal prefix occurs in the text.
    fn candidate_indices(&self, text: &str) -> Vec<usize> {
        let Some(ref matcher) = self.prefilter else {
            return (0..self.patterns.len()).collect();
        };

        let mut indices: Vec<usize> = Vec::new();
        for mat in matcher.find_overlapping_iter(text) {
            let idx = self.prefixed[mat.pattern().as_usize()].1;
            if !indices.contains(&idx) {
                indices.push(idx);
            }
        }
        for (idx, _) in self.patterns.iter().enumerate() {
            if !self.prefixed.iter().any(|(_, i)| *i == idx) && !indices.contains(&idx) {
                indices.push(idx);
            }
        }
        indices.sort_unstable();
        indices
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Prompt-injection attempts in LLM inputs and outputs.
    pub fn prompt_injection() -> Self {
        Self::new(vec![
            ScanPattern::new(
                "ignore_instructions",
                r"(?i)\b(?:ignore|disregard|forget)\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier)\s+(?:instructions|prompts|rules|directives)",
                0.9,
            ),
            ScanPattern::new(
                "reveal_system_prompt",
                r"(?i)\b(?:reveal|show|print|repeat|output|leak)\b[^.\n]{0,40}\b(?:system\s+prompt|initial\s+instructions|hidden\s+instructions)",
                0.9,
            ),
            ScanPattern::new(
                "role_override",
                r"(?i)\byou\s+are\s+now\s+(?:a|an|in)\b",
                0.75,
            ),
            ScanPattern::new(
                "jailbreak_persona",
                r"(?i)\b(?:jailbreak|dan\s+mode|developer\s+mode\s+enabled|do\s+anything\s+now)\b",
                0.85,
            ),
            ScanPattern::new(
                "instruction_smuggling",
                r"(?i)\bnew\s+instructions?\s*:\s*",
                0.7,
            ),
            ScanPattern::new(
                "pretend_no_rules",
                r"(?i)\bpretend\s+(?:that\s+)?(?:you\s+have\s+no|there\s+are\s+no)\s+(?:rules|restrictions|guidelines|filters)",
                0.85,
            ),
        ])
    }

    /// Personally identifiable information.
    pub fn pii() -> Self {
        Self::new(vec![
            ScanPattern::new("ssn", r"\b\d{3}-\d{2}-\d{4}\b", 0.9),
            ScanPattern::new(
                "credit_card",
                r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13}|6(?:011|5[0-9]{2})[0-9]{12})\b",
                0.9,
            ),
            ScanPattern::new(
                "email",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                0.7,
            ),
            ScanPattern::new(
                "phone",
                r"\b(?:\+?1[-. ]?)?\(?[2-9]\d{2}\)?[-. ]\d{3}[-. ]\d{4}\b",
                0.6,
            ),
            ScanPattern::new("iban", r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b", 0.8),
        ])
    }

    /// SQL and shell injection in tool arguments and database queries.
    pub fn query_injection() -> Self {
        Self::new(vec![
            ScanPattern::new(
                "sql_keywords",
                r"(?i)\b(?:union\s+(?:all\s+)?select|drop\s+(?:table|database)|truncate\s+table|delete\s+from|insert\s+into|alter\s+table)\b",
                0.9,
            ),
            ScanPattern::new("sql_tautology", r"(?i)\bor\s+['\x22]?1['\x22]?\s*=\s*['\x22]?1\b", 0.9),
            ScanPattern::new("sql_comment_break", r"['\x22]\s*;\s*--", 0.85),
            ScanPattern::new(
                "shell_chaining",
                r"(?:;|&&|\|\|?)\s*(?:rm|curl|wget|nc|bash|sh|chmod|chown|mkfifo)\b",
                0.9,
            ),
            ScanPattern::new("shell_substitution", r"\$\([^)]*\)|`[^`]*`", 0.8),
            ScanPattern::new("path_traversal", r"\.\./\.\./", 0.7),
        ])
    }

    /// Credentials and key material (abbreviated service-key catalog).
    pub fn secrets() -> Self {
        Self::new(vec![
            ScanPattern::new("openai_api_key", r"sk-(?:proj-)?[a-zA-Z0-9]{20,}", 0.95),
            ScanPattern::new("anthropic_api_key", r"sk-ant-api[a-zA-Z0-9_-]{20,}", 0.95),
            ScanPattern::new("aws_access_key", r"AKIA[0-9A-Z]{16}", 0.95),
            ScanPattern::new("github_token", r"gh[pousr]_[A-Za-z0-9_]{36,}", 0.95),
            ScanPattern::new(
                "private_key_block",
                r"-----BEGIN\s+(?:RSA\s+|EC\s+|OPENSSH\s+)?PRIVATE\s+KEY-----",
                0.95,
            ),
            ScanPattern::new("bearer_header", r"Bearer\s+[a-zA-Z0-9_.\-]{20,}", 0.8),
        ])
    }
}

/// Extract a leading literal run from a regex pattern (if one exists).
fn literal_prefix(pattern: &str) -> Option<String> {
    let mut prefix = String::new();

    for ch in pattern.chars() {
        match ch {
            // These start special regex constructs.
            '[' | '(' | '.' | '|' | '^' | '$' => break,
            // Escape sequence.
            '\\' => break,
            // A quantifier makes the preceding character optional or
            // repeatable, so it is not part of a guaranteed literal.
            '*' | '+' | '?' | '{' => {
                prefix.pop();
                break;
            }
            // Regular character.
            _ => prefix.push(ch),
        }
    }

    if prefix.len() >= 3 {
        Some(prefix)
    } else {
        None
    }
}
