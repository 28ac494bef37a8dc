use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("E001_LOCKED: another run holds the lock at {path}")]
    Locked { path: String },
    #[error("E002_CONVERTER_MISSING: converter executable unavailable: {0}")]
    MissingConverter(String),
    #[error("E005_CONFIG_INVALID: config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("E007_STATE_CORRUPT: ledger unreadable at {path}: {reason}")]
    StateCorrupt { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestErrorCode {
    E001Locked,
    E002ConverterMissing,
    E005ConfigInvalid,
    E007StateCorrupt,
}

impl HarvestErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConverterMissing => "E002_CONVERTER_MISSING",
            Self::E005ConfigInvalid => "E005_CONFIG_INVALID",
            Self::E007StateCorrupt => "E007_STATE_CORRUPT",
        }
    }
}

impl HarvestError {
    pub fn code(&self) -> HarvestErrorCode {
        match self {
            Self::Locked { .. } => HarvestErrorCode::E001Locked,
            Self::MissingConverter(_) => HarvestErrorCode::E002ConverterMissing,
            Self::InvalidConfig(_) => HarvestErrorCode::E005ConfigInvalid,
            Self::StateCorrupt { .. } => HarvestErrorCode::E007StateCorrupt,
        }
    }
}
