//! Causal-ordering bookmarks.

/// Causal consistency bookmark.
///
/// An opaque token handed back by the server after a committed transaction.
/// Supplying it when beginning the next transaction guarantees that the new
/// transaction observes at least the state the bookmarked transaction wrote.
/// The empty bookmark means "no causal constraint".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    value: String,
}

impl Bookmark {
    /// Bookmark from a raw server token.
    pub fn from(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The empty bookmark (no causal constraint).
    pub fn empty() -> Self {
        Self {
            value: String::new(),
        }
    }

    /// Whether this bookmark carries no constraint.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The most recent token, as exchanged with the server.
    pub fn max_bookmark_as_string(&self) -> &str {
        &self.value
    }

    /// The newest bookmark of a set (later bookmarks subsume earlier ones).
    pub fn from_bookmarks(bookmarks: &[Bookmark]) -> Self {
        bookmarks.last().cloned().unwrap_or_else(Self::empty)
    }
}

impl Default for Bookmark {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for Bookmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<String> for Bookmark {
    fn from(s: String) -> Self {
        Self::from(s)
    }
}

impl From<&str> for Bookmark {
    fn from(s: &str) -> Self {
        Self::from(s)
    }
}
