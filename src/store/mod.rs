//! Object store access for backup data

mod client;

pub use client::StoreClient;
