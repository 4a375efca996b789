pub mod client;
pub mod fingerprint;

// Re-export common types
pub use client::{build_client, fetch};
pub use fingerprint::{Profile, StealthEngine};
