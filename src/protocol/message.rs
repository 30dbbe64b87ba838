//! Application-level message payloads.

use super::opcode::OpCode;

// ============================================================================
// Message
// ============================================================================

/// A complete data message as delivered to, or sent by, the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Message {
    /// Returns the frame opcode that carries this message.
    #[inline]
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::Text(_) => OpCode::Text,
            Self::Binary(_) => OpCode::Binary,
        }
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Message::from("hi"), Message::Text("hi".into()));
        assert_eq!(Message::from(vec![1u8, 2]), Message::Binary(vec![1, 2]));
    }

    #[test]
    fn test_opcode_and_bytes() {
        let text = Message::from("abc");
        assert_eq!(text.opcode(), OpCode::Text);
        assert_eq!(text.as_bytes(), b"abc");

        let binary = Message::from(&[7u8, 8][..]);
        assert_eq!(binary.opcode(), OpCode::Binary);
        assert_eq!(binary.as_bytes(), &[7, 8]);
    }
}
