//! The error taxonomy described in spec section 7: one type per error kind,
//! plus a top-level enum for call sites that need to unify them.

use crate::types::Uid;

/// An offending entity was rejected at startup or on a config change; the
/// service keeps running.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("AE title {0:?} is not 1-16 characters long")]
    InvalidAeTitleLength(String),

    #[error("duplicate AE title {0:?}")]
    DuplicateAeTitle(String),

    #[error("processor {processor:?} does not recognize setting {key:?}")]
    UnrecognizedSetting { processor: String, key: String },

    #[error("processor {processor:?} requires at least one pipeline-* setting")]
    MissingPipeline { processor: String },

    #[error("invalid value {value:?} for setting {key:?}: {reason}")]
    InvalidSettingValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

/// A network or filesystem failure encountered during a retryable operation
/// (C-STORE save, payload download, platform call).
#[derive(thiserror::Error, Debug)]
pub enum TransientIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// `StorageInfoProvider` reported that storage or export capacity is
/// exhausted.
#[derive(thiserror::Error, Debug)]
pub enum InsufficientStorageError {
    #[error("cannot store: free space below the can-store threshold")]
    CannotStore,

    #[error("cannot export: free space below the can-export threshold")]
    CannotExport,
}

/// A malformed response from DICOMweb or an unexpected MIME type.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("expected multipart/related response, got {0:?}")]
    UnexpectedMediaType(String),

    #[error("DICOMweb response could not be decoded: {0}")]
    ResponseDecode(String),

    #[error("STOW-RS reported partial failure (HTTP {0})")]
    StowPartialFailure(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Dicom(#[from] dicom::object::ReadError),
}

/// An `InferenceRequest` failed structural validation. Non-retriable.
#[derive(thiserror::Error, Debug)]
pub enum RequestValidationError {
    #[error("transactionId is required")]
    MissingTransactionId,

    #[error("exactly one Algorithm input resource is required, found {0}")]
    WrongAlgorithmCount(usize),

    #[error("at least one retrieval resource is required")]
    NoRetrievalResources,

    #[error("inputMetadata.details is missing required field {0:?}")]
    MissingDetailField(&'static str),

    #[error("no instances were retrieved for transaction {0}")]
    NoInstancesRetrieved(String),
}

/// SCP bind failure, repository unavailable at start: triggers shutdown.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    #[error("failed to bind DIMSE listener on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("repository unavailable at startup: {0}")]
    RepositoryUnavailable(String),

    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Unifies the per-kind errors for call sites (e.g. the supervisor) that
/// need one error type to report upward.
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    TransientIo(#[from] TransientIoError),

    #[error(transparent)]
    InsufficientStorage(#[from] InsufficientStorageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    RequestValidation(#[from] RequestValidationError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// A required DICOM tag was absent from a received dataset.
#[derive(thiserror::Error, Debug)]
#[error("DICOM dataset is missing required tag {0}")]
pub struct MissingRequiredTag(pub &'static str);

/// A required field was absent from an `InferenceRequest` variant keyed by
/// the UID it concerns; kept separate from `MissingRequiredTag` because the
/// caller has a `Uid`, not a `&'static str`.
#[derive(thiserror::Error, Debug)]
#[error("missing required identifier: {0}")]
pub struct MissingIdentifier(pub Uid);
