//! Flat-file stores
//!
//! - `senders`: ordered sender list (`sender.json`)
//! - `relay`: the global relay credentials (`sasl_config.json`)
//! - `secret`: encryption of credentials at rest

pub mod relay;
pub mod secret;
pub mod senders;

pub use relay::{RelayStore, RelaySummary};
pub use secret::{AeadCodec, SecretCodec};
pub use senders::{JsonSenderStore, Sender, SenderBook, SenderStore};
