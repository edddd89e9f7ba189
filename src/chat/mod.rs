//! Conversation handling: coordinator, transcript reconstruction and formatting.

pub mod coordinator;
pub mod locks;
pub mod maintenance;
pub mod sanitizer;
pub mod transcript;

pub use coordinator::{ChatReply, ConversationCoordinator, HistoryEntry};
pub use locks::ConversationLocks;
pub use maintenance::CacheMaintenance;
pub use sanitizer::ResponseSanitizer;
pub use transcript::{fetch_ordered, reconcile};
