//! Remote API surface: domain types, the transport-agnostic boundary trait,
//! and the HTTP implementation of it.

mod http;
mod remote;
pub mod types;

pub use http::{AuthExpiredHook, HttpRemote};
pub use remote::Remote;
