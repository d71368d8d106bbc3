//! Finished display events that are not blocks.

use std::fmt;

use scriv_types::{BlockRole, Completed};

/// A one-off line for the output stream, such as a status or error notice.
///
/// Notices travel through the same sequencer as inscribed blocks so they
/// land in order with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    key: String,
    role: BlockRole,
    text: String,
}

impl Notice {
    pub fn new(key: impl Into<String>, role: BlockRole, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            role,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn role(&self) -> BlockRole {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.role.display_name(), self.text)
    }
}

impl Completed for Notice {
    fn completion_key(&self) -> String {
        self.key.clone()
    }

    /// A notice with nothing to show is not finished.
    fn is_complete(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
