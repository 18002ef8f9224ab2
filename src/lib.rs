//! Lumen Journal sync core
//!
//! Local-first journaling storage with an opt-in, privacy-tiered sync layer.
//! Entries live in SQLite in plaintext; anything that leaves the device is
//! encrypted first, either as AES-256-GCM content ciphertext or as
//! additively maskable metric ciphertexts the server can aggregate without
//! reading.

pub mod crypto;
pub mod db;
pub mod sync;

pub use db::{Database, DbError, EntryMetrics, JournalEntry};
pub use sync::{PrivacyTier, SyncEngine, TierTransitionResult};
