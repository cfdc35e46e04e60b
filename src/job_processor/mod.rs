//! The Job Processor (section 4.4): per-LocalAE instance handler that
//! stages files (already done by the AE-handler) and groups them into jobs
//! via a time-window state machine. Pluggable over a capability set
//! (section 9: "base class + derived processors" becomes a sum type plus a
//! registry, not inheritance).

mod ae_title_processor;
mod grouping;
mod processor;

pub use ae_title_processor::AeTitleProcessor;
pub use processor::{Processor, ProcessorFactory, ProcessorRegistry};
