//! Outbound request messages and response metadata helpers.
//!
//! The wire encoding of these messages belongs to the codec layer; this core
//! only decides *which* messages are written, in what order, and with which
//! flush discipline.

use std::collections::HashMap;

use super::bookmark::Bookmark;
use super::types::Value;

/// Response metadata attached to SUCCESS events.
pub type Metadata = HashMap<String, Value>;

// ============================================================================
// Message
// ============================================================================

/// Request message expecting exactly one terminating response.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Execute a statement (also carries BEGIN/COMMIT/ROLLBACK as statements)
    Run {
        /// Statement text
        statement: String,
        /// Statement parameters
        parameters: HashMap<String, Value>,
    },
    /// Pull all records produced by the preceding RUN
    PullAll,
    /// Discard server-side state and return the connection to a clean slate
    Reset,
}

impl Message {
    /// Statement text, for RUN messages.
    pub fn statement(&self) -> Option<&str> {
        match self {
            Message::Run { statement, .. } => Some(statement),
            _ => None,
        }
    }
}

// ============================================================================
// Metadata extraction
// ============================================================================

/// Ordered result column names from RUN success metadata.
pub fn statement_keys(metadata: &Metadata) -> Vec<String> {
    metadata
        .get("fields")
        .and_then(Value::as_list)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Server-reported time until the first result was available, `-1` if absent.
pub fn result_available_after(metadata: &Metadata) -> i64 {
    metadata
        .get("result_available_after")
        .and_then(Value::as_int)
        .unwrap_or(-1)
}

/// Bookmark carried by COMMIT (and auto-commit PULL) success metadata.
pub fn bookmark(metadata: &Metadata) -> Option<Bookmark> {
    metadata
        .get("bookmark")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(Bookmark::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_keys() {
        let mut metadata = Metadata::new();
        metadata.insert(
            "fields".to_string(),
            Value::List(vec![Value::from("a"), Value::from("b")]),
        );
        assert_eq!(statement_keys(&metadata), vec!["a".to_string(), "b".to_string()]);
        assert!(statement_keys(&Metadata::new()).is_empty());
    }

    #[test]
    fn test_result_available_after() {
        let mut metadata = Metadata::new();
        metadata.insert("result_available_after".to_string(), Value::Integer(7));
        assert_eq!(result_available_after(&metadata), 7);
        assert_eq!(result_available_after(&Metadata::new()), -1);
    }

    #[test]
    fn test_bookmark_extraction() {
        let mut metadata = Metadata::new();
        metadata.insert("bookmark".to_string(), Value::from("gw:bookmark:v1:tx9"));
        assert_eq!(bookmark(&metadata), Some(Bookmark::from("gw:bookmark:v1:tx9")));

        metadata.insert("bookmark".to_string(), Value::from(""));
        assert_eq!(bookmark(&metadata), None);
        assert_eq!(bookmark(&Metadata::new()), None);
    }

    #[test]
    fn test_message_statement() {
        let run = Message::Run {
            statement: "RETURN 1".to_string(),
            parameters: HashMap::new(),
        };
        assert_eq!(run.statement(), Some("RETURN 1"));
        assert_eq!(Message::PullAll.statement(), None);
        assert_eq!(Message::Reset.statement(), None);
    }
}
