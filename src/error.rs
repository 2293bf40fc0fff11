use crate::AcqState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No slot held a device that could be opened.
    #[error("no device available")]
    DeviceNotFound,

    /// A driver call returned a negative status. The session has been closed.
    #[error("HH_{operation} error {code} ({message})")]
    HardwareCallFailed {
        operation: &'static str,
        code: i32,
        message: String,
    },

    /// A parameter is outside the hardware range. Nothing was sent to the device.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The operation is not allowed in the current state. Nothing was sent to the device.
    #[error("{operation} not allowed in state {state:?}")]
    PreconditionViolation {
        operation: &'static str,
        state: AcqState,
    },

    /// The acquisition was stopped through an abort handle.
    #[error("acquisition aborted")]
    Aborted,
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Name of the failing driver operation, if this is a hardware failure.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::HardwareCallFailed { operation, .. } => Some(operation),
            _ => None,
        }
    }
}
