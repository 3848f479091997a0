//! Convsync core library, the conversation synchronization engine shared by the CLI and
//! other front ends: streaming connection, frame decoding, intent translation, and the
//! conversation store.

pub mod api;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod signals;
pub mod store;
pub mod translate;

pub use client::{ChatClient, ClientOptions};
pub use error::SyncError;
