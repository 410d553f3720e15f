//! User-facing failure presentation.
//!
//! Store and validation failures never crash a session; they are turned
//! into a notification string plus a show flag and leave previously
//! loaded state intact. No failure is retried automatically.

use std::fmt::Display;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub show: bool,
}

impl Notice {
    pub fn hidden() -> Self {
        Notice::default()
    }

    pub fn info(message: impl Into<String>) -> Self {
        Notice {
            message: message.into(),
            show: true,
        }
    }

    pub fn from_error(err: &impl Display) -> Self {
        Notice {
            message: format!("Error: {err}"),
            show: true,
        }
    }

    pub fn dismiss(&mut self) {
        self.show = false;
    }
}
