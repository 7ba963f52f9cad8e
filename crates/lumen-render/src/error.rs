// SPDX-License-Identifier: CEPL-1.0

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A creation step failed. Recoverable by retry or downgrade.
    Provisioning,
    /// The device is gone; full teardown and reattach required.
    DeviceLost,
    /// Zero-area surface. Nothing to do.
    DegenerateSurface,
}

/// Failures captured by a context. They are recorded as text for
/// `last_error` and never cross into the UI thread as panics.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PresentError {
    #[error("{stage} failed: {message}")]
    Provisioning { stage: &'static str, message: String },
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("surface has zero area")]
    DegenerateSurface,
}

impl PresentError {
    pub fn provisioning(stage: &'static str, err: impl std::fmt::Display) -> Self {
        PresentError::Provisioning {
            stage,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PresentError::Provisioning { .. } => ErrorKind::Provisioning,
            PresentError::DeviceLost(_) => ErrorKind::DeviceLost,
            PresentError::DegenerateSurface => ErrorKind::DegenerateSurface,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failed_stage() {
        let err = PresentError::provisioning("create_device", "ERROR_INITIALIZATION_FAILED");
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert_eq!(
            err.to_string(),
            "create_device failed: ERROR_INITIALIZATION_FAILED"
        );
        assert_eq!(
            PresentError::DeviceLost("queue_submit".into()).kind(),
            ErrorKind::DeviceLost
        );
    }
}
