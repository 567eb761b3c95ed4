//! Error types for the composer coordinator

use thiserror::Error;

use crate::display_id::DisplayId;
use crate::hal::HalError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid display {0}")]
    InvalidDisplay(DisplayId),

    #[error("{operation} failed for display {display}: {code}")]
    Device {
        operation: String,
        display: DisplayId,
        code: HalError,
    },

    #[error("{operation} is not supported by display {display}")]
    Unsupported { operation: String, display: DisplayId },

    #[error("{operation} rejected a parameter for display {display}")]
    BadParameter { operation: String, display: DisplayId },

    #[error("{operation} rejected the config for display {display}")]
    BadConfig { operation: String, display: DisplayId },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("out of resources: {0}")]
    NoResources(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// A failed device call, with the code kept verbatim
    pub fn device(operation: impl Into<String>, display: DisplayId, code: HalError) -> Self {
        Self::Device {
            operation: operation.into(),
            display,
            code,
        }
    }

    /// A failed device call, with `Unsupported`, `BadParameter` and
    /// `BadConfig` surfaced as their own variants so callers can
    /// feature-detect.
    pub fn from_hal(operation: impl Into<String>, display: DisplayId, code: HalError) -> Self {
        let operation = operation.into();
        match code {
            HalError::Unsupported => Self::Unsupported { operation, display },
            HalError::BadParameter => Self::BadParameter { operation, display },
            HalError::BadConfig => Self::BadConfig { operation, display },
            code => Self::Device {
                operation,
                display,
                code,
            },
        }
    }

    /// Device code carried by this error, if it came from a device call
    pub fn hal_code(&self) -> Option<HalError> {
        match self {
            Self::Device { code, .. } => Some(*code),
            Self::Unsupported { .. } => Some(HalError::Unsupported),
            Self::BadParameter { .. } => Some(HalError::BadParameter),
            Self::BadConfig { .. } => Some(HalError::BadConfig),
            _ => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display_id::PhysicalDisplayId;

    #[test]
    fn test_from_hal_keeps_kinds_distinct() {
        let display = DisplayId::from(PhysicalDisplayId::from_port(0));

        let err = Error::from_hal("setContentType", display, HalError::Unsupported);
        assert!(err.is_unsupported());

        let err = Error::from_hal("setContentType", display, HalError::BadParameter);
        assert!(matches!(err, Error::BadParameter { .. }));

        let err = Error::from_hal("setActiveConfigWithConstraints", display, HalError::BadConfig);
        assert!(matches!(err, Error::BadConfig { .. }));

        let err = Error::from_hal("present", display, HalError::NoResources);
        assert_eq!(err.hal_code(), Some(HalError::NoResources));
        assert!(err.to_string().starts_with("present failed"));
    }
}
