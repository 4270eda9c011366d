pub mod connection_filter;
pub mod line_framer;
pub mod network_listener;
pub mod types;
pub mod upstream;
