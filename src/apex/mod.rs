pub mod client;

// Re-export the client for convenient access (e.g. `use crate::apex::ApexClient`).
pub use client::ApexClient;
