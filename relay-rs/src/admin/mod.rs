/// Admin module
///
/// Provides:
/// - Backup and restore of the Postfix configuration and both stores

pub mod backup;

pub use backup::{BackupManager, BackupMetadata};
