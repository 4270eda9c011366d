pub mod command;
pub mod tracker;

pub use command::{Pop3Command, Verb};
pub use tracker::{ClientAction, CompletedResponse, Outcome, ResponseTracker, Step};
