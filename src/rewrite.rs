//! Response rewriting
//!
//! - `policy`: verb dispatch for complete server responses.
//! - `sizes`: STAT/LIST size accounting.
//! - `retrieval`: RETR/TOP classification header injection.

pub mod policy;
pub mod retrieval;
pub mod sizes;

pub use policy::RewritePolicy;
pub use sizes::HEADER_SIZE_FUDGE_FACTOR;
