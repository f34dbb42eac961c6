//! Installation workflow and the guided wizard on top of it

pub mod installer;
pub mod wizard;

pub use installer::{
    Compensation, InstallOutcome, InstallStep, InstallationStatus, InstallationSteps, Installer,
    UninstallReport, VerificationReport, PRE_SETUP_BACKUP,
};
pub use wizard::{
    InputKind, InputValidation, InstallReport, InstallationWizard, ProviderConfig,
    UninstallResponse, WizardRequest, WizardStep,
};
