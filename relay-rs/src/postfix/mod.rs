//! Postfix configuration, queue and log access

pub mod configurator;
pub mod log;
pub mod main_cf;
pub mod provider;
pub mod queue;

pub use configurator::{PostfixConfigurator, RelayConfig, RelayOutcome};
pub use log::{LogTail, MailLog};
pub use provider::{Provider, ProviderPreset};
pub use queue::{DeliveryStatus, MailQueue, QueueEntry, TestEmail, TestEmailReport};
