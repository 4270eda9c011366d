pub mod controller_handler;
pub mod instance_lock;
pub mod state;

pub use controller_handler::Controller;
pub use state::ProxyState;
