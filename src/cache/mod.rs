//! Caching of reconstructed conversation transcripts.

pub mod transcript;

pub use transcript::{CacheLookup, CacheStats, TranscriptCache};
