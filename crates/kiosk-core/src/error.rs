use std::fmt;

use thiserror::Error;

/// Failures reported across the capability provider boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The capability layer is missing or not initialized on this device.
    #[error("capability unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no launchable entry point for {0}")]
    NoLaunchTarget(String),
    #[error("launch raised: {0}")]
    LaunchException(String),
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

impl ProviderError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Flow the caller should offer when a precondition is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Remediation {
    RequestInstallPermission,
    RequestDeviceOwner,
    RequestDndAccess,
    ConfirmShutdown,
}

impl Remediation {
    pub fn as_str(self) -> &'static str {
        match self {
            Remediation::RequestInstallPermission => "request_install_permission",
            Remediation::RequestDeviceOwner => "request_device_owner",
            Remediation::RequestDndAccess => "request_dnd_access",
            Remediation::ConfirmShutdown => "confirm_shutdown",
        }
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    NoLaunchTarget,
    Exception(String),
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchFailure::NoLaunchTarget => f.write_str("no launchable entry point"),
            LaunchFailure::Exception(msg) => write!(f, "launch raised: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KioskError {
    #[error("{operation} is unavailable on this device")]
    CapabilityUnavailable { operation: &'static str },
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("precondition not met: {0}")]
    PreconditionNotMet(Remediation),
    #[error("provider failure ({code}): {message}")]
    Provider { code: String, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("launch failed: {0}")]
    Launch(LaunchFailure),
    #[error("an acquisition is already in flight")]
    InFlight,
    #[error("agent has shut down")]
    Closed,
}

impl KioskError {
    pub fn validation(message: impl Into<String>) -> Self {
        KioskError::Validation(message.into())
    }

    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            KioskError::PreconditionNotMet(remediation) => Some(*remediation),
            _ => None,
        }
    }

    /// Maps a provider failure that is not a degradation case. `Unavailable`
    /// only reaches here for operations without a degraded default.
    pub(crate) fn from_provider(operation: &'static str, err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(_) => KioskError::CapabilityUnavailable { operation },
            ProviderError::NotFound(what) => KioskError::NotFound(what),
            ProviderError::NoLaunchTarget(_) => KioskError::Launch(LaunchFailure::NoLaunchTarget),
            ProviderError::LaunchException(msg) => {
                KioskError::Launch(LaunchFailure::Exception(msg))
            }
            ProviderError::Rejected { code, message } => KioskError::Provider { code, message },
        }
    }
}
