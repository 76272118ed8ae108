pub mod client;
pub mod types;

pub use client::{CrmApi, UcrmClient};
pub use types::{AttributePatch, CrmClient, CrmService, CustomAttribute};
