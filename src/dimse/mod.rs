//! The DIMSE SCP (section 4.1): concurrent C-ECHO/C-STORE server with
//! per-association admission, source validation, and transfer-syntax
//! negotiation.

mod admission;
mod association;
mod listener;
mod scp;
mod status;

pub use admission::{admit, AdmissionDecision, AdmissionRejection};
pub use association::{AssociationIdSequence, AssociationState};
pub use listener::{dimse_listener, ListenerConfig};
pub use scp::ScpConfig;
pub use status::DimseStatus;
