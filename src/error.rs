use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised anywhere in the capture/upload/search/chat flows.
///
/// Every variant is produced at the point the underlying call fails (HTTP
/// status, io error kind), so callers branch on [`Error::kind`] instead of
/// sniffing message text.
#[derive(Debug, Error)]
pub enum Error {
    #[error("camera permission denied")]
    CameraDenied,
    #[error("camera acquisition failed: {0}")]
    Camera(String),
    #[error("authentication required")]
    AuthRequired,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("bucket \"{0}\" not found")]
    BucketNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("data store error: {detail}")]
    Rows { op: RowsOp, detail: String },
    #[error("duplicate row: {0}")]
    Conflict(String),
    #[error("annotation service error: {0}")]
    Annotation(String),
    #[error("chat service error: {0}")]
    ChatService(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("{0}")]
    Other(String),
}

/// Which way a row request was headed when it failed. Reads and writes get
/// different user-facing copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsOp {
    Read,
    Write,
}

/// Broad failure class used for flow decisions (conflict absorption,
/// permission gating) and for grouping in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Permission,
    Network,
    Conflict,
    RemoteService,
    Unknown,
}

impl Error {
    pub fn rows_read(detail: impl Into<String>) -> Self {
        Error::Rows {
            op: RowsOp::Read,
            detail: detail.into(),
        }
    }

    pub fn rows_write(detail: impl Into<String>) -> Self {
        Error::Rows {
            op: RowsOp::Write,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CameraDenied | Error::AuthRequired | Error::Auth(_) => ErrorKind::Permission,
            Error::BucketNotFound(_) | Error::Storage(_) | Error::Rows { .. } | Error::Http(_) => {
                ErrorKind::Network
            }
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Annotation(_) | Error::ChatService(_) => ErrorKind::RemoteService,
            Error::Camera(_) | Error::Decode(_) | Error::Other(_) => ErrorKind::Unknown,
        }
    }

    /// Short text suitable for showing directly to the user.
    pub fn user_message(&self) -> String {
        match self {
            Error::CameraDenied => "Failed to access camera. Please grant permissions.".into(),
            Error::Camera(_) => "Failed to access camera. Please try again.".into(),
            Error::AuthRequired => "Authentication required. Please log in and try again.".into(),
            Error::Auth(msg) => msg.clone(),
            Error::BucketNotFound(_) => {
                "Upload bucket not found. Please check your storage configuration.".into()
            }
            Error::Storage(_) | Error::Http(_) => {
                "Failed to upload file to storage. Please try again.".into()
            }
            Error::Rows {
                op: RowsOp::Read, ..
            } => "Failed to load image information. Please try again.".into(),
            Error::Rows {
                op: RowsOp::Write, ..
            } => "Failed to save image information. Please try again.".into(),
            Error::Conflict(_) => "Already recorded.".into(),
            Error::Annotation(_) => "Failed to process image information. Please try again.".into(),
            Error::ChatService(msg) => msg.clone(),
            Error::Decode(_) | Error::Other(_) => "An error occurred. Please try again.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_flow_taxonomy() {
        assert_eq!(Error::CameraDenied.kind(), ErrorKind::Permission);
        assert_eq!(Error::AuthRequired.kind(), ErrorKind::Permission);
        assert_eq!(
            Error::BucketNotFound("image-store".into()).kind(),
            ErrorKind::Network
        );
        assert_eq!(Error::Conflict("likes".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            Error::Annotation("boom".into()).kind(),
            ErrorKind::RemoteService
        );
        assert_eq!(Error::Camera("no device".into()).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn rows_copy_splits_reads_from_writes() {
        assert_eq!(Error::rows_read("HTTP 500: boom").kind(), ErrorKind::Network);
        assert_eq!(
            Error::rows_read("HTTP 500: boom").user_message(),
            "Failed to load image information. Please try again."
        );
        assert_eq!(
            Error::rows_write("HTTP 500: boom").user_message(),
            "Failed to save image information. Please try again."
        );
    }

    #[test]
    fn user_messages_stay_distinct_per_failure_class() {
        let bucket = Error::BucketNotFound("image-store".into()).user_message();
        let auth = Error::AuthRequired.user_message();
        let annotation = Error::Annotation("HTTP 500".into()).user_message();
        let storage = Error::Storage("HTTP 503".into()).user_message();
        assert!(bucket.contains("bucket"));
        assert!(auth.contains("log in"));
        assert!(annotation.contains("process image information"));
        assert_ne!(bucket, storage);
        assert_ne!(annotation, storage);
    }
}
