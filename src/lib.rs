pub mod ae_change_bus;
pub mod ae_handler;
pub mod cleanup_queue;
pub mod config;
pub mod dicomweb;
pub mod dimse;
pub mod error;
pub mod export;
pub mod health;
pub mod inference_retrieval;
pub mod instance_bus;
pub mod job_processor;
pub mod job_submission;
pub mod model;
pub mod notification_bus;
pub mod platform;
pub mod repository;
pub mod run_from_env;
pub mod sanitize;
pub mod storage_info;
pub mod supervisor;
pub mod types;

pub use error::AdapterError;
pub use run_from_env::{run, run_from_env};
