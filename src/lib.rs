#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
pub(crate) mod serde_helpers;
pub mod tasks;
pub mod types;
pub mod ws;

pub use client::{Client, Stats};
pub use types::{Message, MessageType};

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Timestamp in milliseconds since [`std::time::UNIX_EPOCH`]
pub type Timestamp = i64;
