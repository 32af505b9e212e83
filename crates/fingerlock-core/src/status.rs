//! Bounded human-readable status strings

use std::fmt;

/// Maximum status length in bytes
pub const STATUS_CAPACITY: usize = 127;

/// A status line truncated to [`STATUS_CAPACITY`] bytes on a char boundary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusText(String);

impl StatusText {
    /// Replace the text, truncating if needed
    pub fn set(&mut self, text: impl Into<String>) {
        let mut text = text.into();
        if text.len() > STATUS_CAPACITY {
            let mut end = STATUS_CAPACITY;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        self.0 = text;
    }

    /// The current text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the text is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_kept() {
        let mut status = StatusText::default();
        assert!(status.is_empty());
        status.set("FP OK");
        assert_eq!(status.as_str(), "FP OK");
    }

    #[test]
    fn test_long_text_truncated_on_char_boundary() {
        let mut status = StatusText::default();
        status.set("é".repeat(100));
        assert!(status.as_str().len() <= STATUS_CAPACITY);
        assert_eq!(status.as_str().len(), 126);

        status.set("x".repeat(500));
        assert_eq!(status.as_str().len(), STATUS_CAPACITY);
    }
}
