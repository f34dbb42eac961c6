//! relay-rs: Postfix SMTP relay installer and administration
//!
//! Installs Postfix, points it at an authenticated upstream relay (Gmail,
//! Outlook, SendGrid, AWS SES or a custom server) and exposes the day to day
//! operations through a JSON API and the `relayctl` command line.
//!
//! # Example
//!
//! ```no_run
//! use relay_rs::config::Config;
//! use relay_rs::context::RelayContext;
//! use relay_rs::postfix::{Provider, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> relay_rs::Result<()> {
//!     let relay = RelayContext::system(Config::load(None)?);
//!     relay.prepare().await?;
//!
//!     let gmail = RelayConfig::for_provider(Provider::Gmail, "me@gmail.com", "app-password");
//!     let outcome = relay.installer.run_installation(&gmail).await?;
//!     println!("installed: {}", outcome.success);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`exec`]: command execution and privileged file writes
//! - [`system`]: host detection, packages and systemd services
//! - [`postfix`]: main.cf, provider presets, queue and log
//! - [`store`]: sender list and sealed relay credentials
//! - [`admin`]: configuration backups
//! - [`install`]: installation workflow and wizard
//! - [`api`]: HTTP API

pub mod admin;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod install;
pub mod postfix;
pub mod store;
pub mod system;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use context::RelayContext;
pub use error::{RelayError, Result};
