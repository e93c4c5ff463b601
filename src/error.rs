/// Violations of the appender's call order. These indicate a bug in the caller,
/// not a runtime condition, so they are kept apart from the I/O failures.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum MisuseError {
    #[error("misuse: the base image has already been resolved on this appender")]
    AlreadyResolved,
    #[error("misuse: the layer type is not known before the base image has been resolved")]
    NotResolved,
}

#[derive(thiserror::Error, Debug)]
pub enum AppendError {
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("pulling {reference}")]
    Pull {
        reference: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("getting media type of base image {reference}")]
    MediaType {
        reference: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("appending layers")]
    AppendLayers(#[source] anyhow::Error),

    #[error("computing manifest digest")]
    Digest(#[source] anyhow::Error),

    #[error("pushing {reference}")]
    Push {
        reference: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Misuse(#[from] MisuseError),
}

impl AppendError {
    pub(crate) fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        AppendError::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn is_misuse(&self) -> bool {
        matches!(self, AppendError::Misuse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misuse_is_labeled() {
        let e: AppendError = MisuseError::AlreadyResolved.into();
        assert!(e.is_misuse());
        assert!(e.to_string().starts_with("misuse:"));
    }

    #[test]
    fn test_pull_keeps_source_chain() {
        let e = AppendError::Pull {
            reference: "index.docker.io/library/busybox:latest".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };
        let rendered = format!("{:#}", anyhow::Error::from(e));
        assert!(rendered.contains("pulling index.docker.io/library/busybox:latest"));
        assert!(rendered.contains("connection refused"));
    }
}
