pub mod classification;
pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod error_handling;
pub mod network;
pub mod pop3;
pub mod rewrite;
pub mod session_management;
pub mod storage;
pub mod web_interface;

pub use session_management::SessionStatus;
