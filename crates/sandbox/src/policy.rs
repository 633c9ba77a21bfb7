//! Static pre-execution check.
//!
//! The scan is textual and runs over the whole source, string literals
//! included, so names hidden inside f-string expressions are caught as well.

use thiserror::Error;

use crate::config::SandboxConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("policy violation: {reason}")]
pub struct PolicyViolation {
    reason: String,
}

impl PolicyViolation {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Checks `source` against the length limit and the denylist.
///
/// # Errors
///
/// Returns the first `PolicyViolation` found.
pub fn check(source: &str, config: &SandboxConfig) -> Result<(), PolicyViolation> {
    let len = source.chars().count();
    if len > config.max_source_len {
        return Err(PolicyViolation::new(format!(
            "code is {len} characters long, the limit is {}",
            config.max_source_len
        )));
    }

    let deny = &config.denylist;
    for module in imported_modules(source) {
        if deny.modules().contains(module) {
            return Err(PolicyViolation::new(format!(
                "import of module '{module}' is not allowed"
            )));
        }
    }

    let words = identifiers(source);
    for (word, rest) in &words {
        if deny.builtins().contains(*word) && rest.trim_start().starts_with('(') {
            return Err(PolicyViolation::new(format!(
                "call to '{word}' is not allowed"
            )));
        }
    }
    for (word, _) in &words {
        if deny.attributes().contains(*word) {
            return Err(PolicyViolation::new(format!(
                "access to '{word}' is not allowed"
            )));
        }
    }
    Ok(())
}

/// Top-level module names from `import a.b, c as d` and `from a.b import x`,
/// wherever the keywords appear, including one-line suites such as `if c: import os`.
fn imported_modules(source: &str) -> Vec<&str> {
    let words = identifiers(source);
    let mut modules = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let (word, rest) = words[i];
        match word {
            "import" if rest.starts_with(char::is_whitespace) => {
                let clause = rest.split(['\n', ';', ')']).next().unwrap_or(rest);
                for part in clause.split(',') {
                    if let Some(name) = part.split_whitespace().next() {
                        modules.push(root_module(name));
                    }
                }
            }
            "from" if rest.starts_with(char::is_whitespace) => {
                if let Some(name) = rest.split_whitespace().next() {
                    modules.push(root_module(name));
                }
                // The names after the matching `import` are members, not modules.
                if let Some(offset) = words[i + 1..]
                    .iter()
                    .take(8)
                    .position(|(w, _)| *w == "import")
                {
                    i += offset + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    modules
}

fn root_module(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Every identifier-shaped word in `source`, paired with the text after it.
fn identifiers(source: &str) -> Vec<(&str, &str)> {
    let mut words = Vec::new();
    let mut start = None;
    for (i, c) in source.char_indices() {
        let ident = c == '_' || c.is_alphanumeric();
        match (start, ident) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                words.push((&source[s..i], &source[i..]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push((&source[s..], ""));
    }
    words
}
