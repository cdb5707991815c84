// Errors that end a download session.
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    Download,
    Verification,
    Extraction,
    MissingBinary,
    PackageManager,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Download => "download",
            Self::Verification => "checksum verification",
            Self::Extraction => "extraction",
            Self::MissingBinary => "binary lookup",
            Self::PackageManager => "package manager",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum ToolingError {
    #[error("FFmpeg is not available: {reason}")]
    BinaryUnavailable {
        reason: String,
        instructions: Vec<String>,
    },

    #[error("FFmpeg installation failed at {stage}: {cause}")]
    ProvisioningFailed {
        stage: ProvisionStage,
        cause: String,
        listing: Vec<String>,
    },

    #[error("Unsupported stream URL: {url}")]
    InvalidUrl { url: String },

    #[error("FFmpeg exited with {}", exit_code_label(.code))]
    ProcessFailure { code: Option<i32> },

    #[error(transparent)]
    Unexpected(#[from] std::io::Error),
}

pub(crate) fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl ToolingError {
    pub(crate) fn provisioning(stage: ProvisionStage, cause: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            stage,
            cause: cause.into(),
            listing: Vec::new(),
        }
    }

    pub(crate) fn with_listing(self, entries: Vec<String>) -> Self {
        match self {
            Self::ProvisioningFailed { stage, cause, .. } => Self::ProvisioningFailed {
                stage,
                cause,
                listing: entries,
            },
            other => other,
        }
    }
}
