use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest slug accepted as a chapter identifier.
pub const MAX_CHAPTER_ID_LEN: usize = 64;

/// Stable identifier of a chapter, a lowercase slug such as `python_intro`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChapterId(String);

impl ChapterId {
    /// Creates a `ChapterId` after checking the slug shape.
    ///
    /// # Errors
    ///
    /// Returns `ParseIdError` if the slug is empty, too long, or contains characters
    /// other than ASCII lowercase letters, digits, `_` and `-`.
    pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_CHAPTER_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(id))
        } else {
            Err(ParseIdError {
                kind: "ChapterId".to_string(),
            })
        }
    }

    /// Returns the slug.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier of one learner session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a fresh random `SessionId`
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID
    #[must_use]
    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChapterId({})", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

// ─── Display Implementations ───────────────────────────────────────────────────

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Conversions ───────────────────────────────────────────────────────────────

/// Error type for parsing ID from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

impl FromStr for ChapterId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChapterId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChapterId> for String {
    fn from(id: ChapterId) -> Self {
        id.0
    }
}

impl FromStr for SessionId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(SessionId)
            .map_err(|_| ParseIdError {
                kind: "SessionId".to_string(),
            })
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_id_display() {
        let id = ChapterId::new("python_intro").unwrap();
        assert_eq!(id.to_string(), "python_intro");
    }

    #[test]
    fn test_chapter_id_from_str() {
        let id: ChapterId = "lists-2".parse().unwrap();
        assert_eq!(id.as_str(), "lists-2");
    }

    #[test]
    fn test_chapter_id_rejects_bad_slugs() {
        assert!("".parse::<ChapterId>().is_err());
        assert!("Has Spaces".parse::<ChapterId>().is_err());
        assert!("UPPER".parse::<ChapterId>().is_err());
        assert!("x".repeat(MAX_CHAPTER_ID_LEN + 1).parse::<ChapterId>().is_err());
    }

    #[test]
    fn test_chapter_id_serde_validates() {
        let ok: ChapterId = serde_json::from_str("\"operations\"").unwrap();
        assert_eq!(ok.as_str(), "operations");
        assert!(serde_json::from_str::<ChapterId>("\"not ok\"").is_err());
    }

    #[test]
    fn test_session_id_roundtrip() {
        let original = SessionId::generate();
        let parsed: SessionId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_session_id_from_str_invalid() {
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
