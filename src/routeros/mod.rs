pub mod client;
pub mod proto;
pub mod session;

pub use client::ApiClient;
pub use session::{Mikrotik, RouterSession, RouterTarget};
