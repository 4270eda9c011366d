//! Message classification
//!
//! - `message`: header/body parsing that keeps the body bytes untouched.
//! - `tokenizer`: turns a parsed message into classifier tokens.
//! - `classifier`: the Classifier trait, results and dispositions.
//! - `headers`: the headers injected into retrieved mail.

pub mod classifier;
pub mod headers;
pub mod message;
pub mod tokenizer;

pub use classifier::{ClassificationResult, Classifier, Disposition, UntrainedClassifier};
pub use message::MailMessage;
