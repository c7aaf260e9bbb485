//! Secrets Core - credential vault primitives
//!
//! This crate provides:
//! - A typed `<mode>;<encoding>;<encryption>;<payload>` secret wire format
//! - Argon2id + AES-GCM encryption behind a pluggable `CryptoProvider`
//! - Secret values with rotation, grace periods and expiry
//! - A concurrent registry of secrets under one master password
//! - File persistence with optional whole-file encryption

pub mod clock;
pub mod codec;
pub mod crypto;
pub mod cryptmap;
pub mod error;
pub mod item;
pub mod models;
pub mod registry;
pub mod storage;
pub mod value;

pub use clock::*;
pub use codec::*;
pub use crypto::*;
pub use cryptmap::*;
pub use error::*;
pub use item::*;
pub use models::*;
pub use registry::*;
pub use storage::*;
pub use value::*;
