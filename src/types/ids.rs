//! Validated identifier newtypes, grounded on `oxidicom`'s
//! `AETitle`/`ClientAETitle`/`OurAETitle` use of `aliri_braid`'s `#[braid]`
//! macro: every identifier gets its own type so a `JobId` can never be
//! passed where a `TransactionId` is expected.

use aliri_braid::braid;

/// A DICOM Application Entity title, 1-16 characters. Validity (length,
/// charset) is enforced where an `AeTitle` is constructed from external
/// input, not by the type itself.
#[braid(serde)]
pub struct AeTitle;

/// A DICOM unique identifier (Study/Series/SOP Instance UID, or similar).
#[braid(serde)]
pub struct Uid;

/// The `transactionId` of an `InferenceRequest`.
#[braid(serde)]
pub struct TransactionId;

/// An identifier assigned by the platform to a submitted job.
#[braid(serde)]
pub struct JobId;

/// An identifier assigned by the platform to an uploaded payload.
#[braid(serde)]
pub struct PayloadId;

/// Identifies which pipeline/algorithm a job runs.
#[braid(serde)]
pub struct PipelineId;

/// An identifier for a queued export task.
#[braid(serde)]
pub struct TaskId;
