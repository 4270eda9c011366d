//! Storage subsystem
//!
//! Message caches filled by the proxy and evicted by age.
//!
//! Components:
//! - `corpus`: the Corpus trait and the spam/ham/unknown triple.
//! - `file_corpus`: directory-per-cache implementation with mtime expiry.

pub mod corpus;
pub mod file_corpus;

pub use corpus::{Corpora, Corpus};
pub use file_corpus::ExpiryFileCorpus;
