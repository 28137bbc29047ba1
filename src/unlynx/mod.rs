//! Protocol service adapter.

pub mod client;

pub use client::UnlynxClient;
