//! Core types and trait definitions for the Atelier studio backend.
//!
//! This crate is deliberately free of HTTP, database and image dependencies.
//! Every other crate depends on it: the record-store trait lives here along
//! with the pure prompt compositor, so both can be exercised without a
//! running backend.

pub mod client;
pub mod compose;
pub mod error;
pub mod history;
pub mod identity;
pub mod layer;
pub mod lookbook;
pub mod settings;
pub mod store;
pub mod user;

pub use error::{Error, Result};
