//! Identifier types for conversations, runs and workers.
//!
//! Backend-issued identifiers are opaque strings, so each one gets its own
//! newtype to keep a `RunId` from being passed where a `ConversationId` is
//! expected. `TurnId` is generated locally and only used for log correlation.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw value of the "not usable" conversation sentinel.
const UNUSABLE_CONVERSATION: &str = "__unusable__";

/// Declare a string newtype with a consistent API.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a backend-issued identifier.
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// Handle to a durable message sequence held by the agent backend (a "thread").
    ConversationId
);
define_string_id!(
    /// Identifier of one submitted run.
    RunId
);
define_string_id!(
    /// Identifier of a backend worker (an "assistant").
    WorkerId
);
define_string_id!(
    /// Identifier of a single stored message.
    MessageId
);
define_string_id!(
    /// Identifier of a pending tool call awaiting a decision.
    ActionId
);

impl ConversationId {
    /// Sentinel returned when no backend conversation could be allocated.
    ///
    /// Downstream calls recognise it through [`ConversationId::is_usable`]
    /// and degrade to an explanatory reply instead of calling the backend.
    #[must_use]
    pub fn unusable() -> Self {
        Self(UNUSABLE_CONVERSATION.to_string())
    }

    /// Whether this id refers to a real backend conversation.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.0.trim().is_empty() && self.0 != UNUSABLE_CONVERSATION
    }
}

/// Locally generated id tying together the log lines of one `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Create a new random turn id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
