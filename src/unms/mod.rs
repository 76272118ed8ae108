pub mod client;
pub mod types;

pub use client::{InventoryApi, UnmsClient};
pub use types::{BlackboxConfig, BlackboxInterface, NmsDevice};
