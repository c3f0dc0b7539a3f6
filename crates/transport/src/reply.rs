//! Typed replies produced by the protocol layer.

use crate::error::TransportError;

use bytes::Bytes;

/// A decoded reply or push value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Null bulk or null array
    Nil,
    /// Simple status string such as `OK`
    Status(String),
    /// Error reply sent by the node
    Error(String),
    /// Integer reply
    Integer(i64),
    /// Bulk string
    Bulk(Bytes),
    /// Array of nested replies
    Array(Vec<Reply>),
}

impl Reply {
    /// Convenience constructor for a bulk string
    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Self::Bulk(value.into())
    }

    /// Whether this is an error reply
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Interpret as an integer
    ///
    /// # Errors
    /// Returns `TransportError::Protocol` for any other shape.
    pub fn into_integer(self) -> Result<i64, TransportError> {
        match self {
            Self::Integer(value) => Ok(value),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Interpret as a UTF-8 string
    ///
    /// # Errors
    /// Returns `TransportError::Protocol` for non-string shapes or invalid UTF-8.
    pub fn into_string(self) -> Result<String, TransportError> {
        match self {
            Self::Status(value) => Ok(value),
            Self::Bulk(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|e| TransportError::Protocol(format!("invalid UTF-8: {e}"))),
            other => Err(unexpected("string", &other)),
        }
    }

    /// Interpret as an array of replies
    ///
    /// # Errors
    /// Returns `TransportError::Protocol` for any other shape.
    pub fn into_array(self) -> Result<Vec<Self>, TransportError> {
        match self {
            Self::Array(items) => Ok(items),
            Self::Nil => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Interpret as an array of strings
    ///
    /// # Errors
    /// Returns `TransportError::Protocol` if any element is not a string.
    pub fn into_strings(self) -> Result<Vec<String>, TransportError> {
        self.into_array()?
            .into_iter()
            .map(Self::into_string)
            .collect()
    }

    /// Interpret a flat `[name, count, name, count, ...]` array as pairs
    ///
    /// # Errors
    /// Returns `TransportError::Protocol` on odd length or mistyped elements.
    pub fn into_counts(self) -> Result<Vec<(String, i64)>, TransportError> {
        let items = self.into_array()?;
        if items.len() % 2 != 0 {
            return Err(TransportError::Protocol(format!(
                "expected name/count pairs, got {} elements",
                items.len()
            )));
        }

        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let (Some(name), Some(count)) = (items.next(), items.next()) {
            pairs.push((name.into_string()?, count.into_integer()?));
        }
        Ok(pairs)
    }
}

fn unexpected(expected: &str, got: &Reply) -> TransportError {
    TransportError::Protocol(format!("expected {expected} reply, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_pairs() {
        let reply = Reply::Array(vec![
            Reply::bulk("channel1"),
            Reply::Integer(1),
            Reply::bulk("channel3"),
            Reply::Integer(0),
        ]);
        assert_eq!(
            reply.into_counts().unwrap(),
            vec![("channel1".to_string(), 1), ("channel3".to_string(), 0)]
        );

        let odd = Reply::Array(vec![Reply::bulk("channel1")]);
        assert!(matches!(odd.into_counts(), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_nil_is_empty_array() {
        assert_eq!(Reply::Nil.into_strings().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_mistyped_replies() {
        assert!(Reply::bulk("7").into_integer().is_err());
        assert!(Reply::Integer(7).into_string().is_err());
        assert!(Reply::Error("ERR".into()).into_array().is_err());
        assert!(Reply::Error("ERR".into()).is_error());
    }
}
