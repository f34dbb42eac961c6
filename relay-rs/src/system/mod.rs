//! Host probing, package installation and service lifecycle

pub mod detector;
pub mod packages;
pub mod service;

pub use detector::{OsFamily, OsInfo, ServiceStatus, SystemDetector, SystemProfile};
pub use packages::{PackageManager, PackageManagerKind};
pub use service::{PostfixStatus, ServiceManager};
