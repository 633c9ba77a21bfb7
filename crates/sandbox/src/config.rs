use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_SOURCE_LEN: usize = 1000;
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;
pub const DEFAULT_MAX_COLLECTION_LEN: usize = 100_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

const DENIED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "urllib",
    "requests",
    "pickle",
    "marshal",
    "shelve",
    "importlib",
    "ctypes",
    "builtins",
    "inspect",
    "threading",
    "multiprocessing",
    "io",
    "pathlib",
];

const DENIED_BUILTINS: &[&str] = &[
    "open",
    "input",
    "raw_input",
    "__import__",
    "reload",
    "compile",
    "eval",
    "exec",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "breakpoint",
    "help",
    "memoryview",
];

const DENIED_ATTRIBUTES: &[&str] = &[
    "__class__",
    "__bases__",
    "__subclasses__",
    "__mro__",
    "__globals__",
    "__builtins__",
    "__dict__",
    "__code__",
    "__getattribute__",
    "__loader__",
    "__spec__",
    "__closure__",
];

/// Names the static policy check rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denylist {
    modules: BTreeSet<String>,
    builtins: BTreeSet<String>,
    attributes: BTreeSet<String>,
}

impl Default for Denylist {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|n| (*n).to_string()).collect();
        Self {
            modules: owned(DENIED_MODULES),
            builtins: owned(DENIED_BUILTINS),
            attributes: owned(DENIED_ATTRIBUTES),
        }
    }
}

impl Denylist {
    /// A denylist that rejects nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            modules: BTreeSet::new(),
            builtins: BTreeSet::new(),
            attributes: BTreeSet::new(),
        }
    }

    /// Adds builtin names; they are also removed from the snippet's namespace.
    #[must_use]
    pub fn with_builtins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builtins.extend(
            names
                .into_iter()
                .map(Into::into)
                .map(|n: String| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        );
        self
    }

    #[must_use]
    pub fn with_modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    #[must_use]
    pub fn builtins(&self) -> &BTreeSet<String> {
        &self.builtins
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeSet<String> {
        &self.attributes
    }

    #[must_use]
    pub fn denies_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }
}

/// Limits and policy applied to every execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Wall-clock budget per run.
    pub timeout: Duration,
    /// Maximum source length in characters.
    pub max_source_len: usize,
    /// Maximum captured output in bytes.
    pub output_limit: usize,
    /// Maximum length of any string, list, tuple, dict or set the snippet builds.
    pub max_collection_len: usize,
    pub max_call_depth: usize,
    pub denylist: Denylist,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_source_len: DEFAULT_MAX_SOURCE_LEN,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            max_collection_len: DEFAULT_MAX_COLLECTION_LEN,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            denylist: Denylist::default(),
        }
    }
}

impl SandboxConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_source_len(mut self, max_source_len: usize) -> Self {
        self.max_source_len = max_source_len;
        self
    }

    #[must_use]
    pub fn with_denylist(mut self, denylist: Denylist) -> Self {
        self.denylist = denylist;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_denylist_covers_known_escapes() {
        let deny = Denylist::default();
        assert!(deny.modules().contains("os"));
        assert!(deny.denies_builtin("eval"));
        assert!(deny.attributes().contains("__subclasses__"));
        assert!(!deny.denies_builtin("print"));
    }

    #[test]
    fn extra_builtins_are_trimmed() {
        let deny = Denylist::default().with_builtins([" sorted ", ""]);
        assert!(deny.denies_builtin("sorted"));
        assert!(!deny.denies_builtin(""));
    }
}
