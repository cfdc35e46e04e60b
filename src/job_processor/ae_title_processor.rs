//! The default processor (section 4.4): groups by a DICOM identifier drawn
//! from the small set `InstanceStorageInfo` already carries (section 1
//! non-goal: "does not reinterpret DICOM tags beyond a small identifier
//! set"), then emits one `InferenceJob` per configured `pipeline-*`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::model::{InferenceJob, InstanceStorageInfo, JobState, LocalApplicationEntity};
use crate::repository::Repository;
use crate::sanitize::fix_job_name;
use crate::types::{AeTitle, ConfiguredPriority, PipelineId};

use super::grouping::GroupAccumulator;
use super::processor::Processor;

const DEFAULT_TIMEOUT_SECS: u64 = 5;
const MINIMUM_TIMEOUT_SECS: u64 = 5;
const DEFAULT_GROUP_BY: &str = "0020,000D";

pub struct AeTitleProcessor {
    ae_title: AeTitle,
    pipelines: Vec<PipelineId>,
    priority_byte: u8,
    group_by: String,
    accumulator: Arc<GroupAccumulator>,
    repository: Arc<dyn Repository>,
    cancel: CancellationToken,
}

impl AeTitleProcessor {
    pub const PROCESSOR_NAME: &'static str = "AE Title Job Processor";

    pub fn new(
        ae: LocalApplicationEntity,
        repository: Arc<dyn Repository>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigurationError> {
        Self::validate_settings(&ae)?;
        let timeout = Duration::from_secs(parse_timeout(&ae)?);
        let priority_byte = parse_priority_byte(&ae)?;
        let group_by = ae
            .setting("groupBy")
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_GROUP_BY.to_string());
        let pipelines = ae
            .settings_with_prefix("pipeline-")
            .map(|(_, v)| PipelineId::from(v.to_string()))
            .collect();
        Ok(Self {
            ae_title: ae.ae_title,
            pipelines,
            priority_byte,
            group_by,
            accumulator: Arc::new(GroupAccumulator::new(timeout)),
            repository,
            cancel,
        })
    }

    /// Validates the enumerated settings named in section 4.4. Called both
    /// at registry-time (before any instance arrives) and from `new`.
    pub fn validate_settings(ae: &LocalApplicationEntity) -> Result<(), ConfigurationError> {
        for (key, value) in &ae.processor_settings {
            match key.as_str() {
                "priority" => {
                    value.parse::<ConfiguredPriority>()?;
                }
                "timeout" => {
                    let seconds: u64 = value.parse().map_err(|_| invalid_setting(key, value, "not an integer"))?;
                    if seconds < MINIMUM_TIMEOUT_SECS {
                        return Err(invalid_setting(key, value, "must be >= 5"));
                    }
                }
                "jobRetryDelay" => {
                    let _: u64 = value.parse().map_err(|_| invalid_setting(key, value, "not an integer"))?;
                }
                "groupBy" => {
                    resolve_group_value(value, &dummy_instance()).map_err(|_| {
                        invalid_setting(key, value, "must be one of 0020,000D / 0020,000E / 0010,0020")
                    })?;
                }
                key if key.starts_with("pipeline-") => {}
                other => {
                    return Err(ConfigurationError::UnrecognizedSetting {
                        processor: Self::PROCESSOR_NAME.to_string(),
                        key: other.to_string(),
                    })
                }
            }
        }
        if !ae.processor_settings.iter().any(|(k, _)| k.starts_with("pipeline-")) {
            return Err(ConfigurationError::MissingPipeline {
                processor: Self::PROCESSOR_NAME.to_string(),
            });
        }
        Ok(())
    }

    fn group_value(&self, info: &InstanceStorageInfo) -> String {
        resolve_group_value(&self.group_by, info).unwrap_or_else(|_| info.study_instance_uid.as_str().to_string())
    }

}

async fn emit_window(
    repository: Arc<dyn Repository>,
    ae_title: AeTitle,
    pipelines: Vec<PipelineId>,
    priority_byte: u8,
    group_value: String,
    instances: Vec<InstanceStorageInfo>,
) {
    for pipeline in &pipelines {
        let job = InferenceJob {
            record_id: Uuid::new_v4(),
            job_id: None,
            payload_id: None,
            job_name: fix_job_name(format!("{}-{}-{}", ae_title.as_str(), group_value, pipeline.as_str())),
            pipeline_id: pipeline.clone(),
            priority: priority_byte,
            instances: instances.clone(),
            state: JobState::Created,
            retries: 0,
        };
        if let Err(e) = repository.put_inference_job(job).await {
            tracing::error!(
                event = "job_processor",
                ae_title = %ae_title.as_str(),
                pipeline = %pipeline.as_str(),
                error = %e,
                "failed to persist job"
            );
        }
    }
}

impl Processor for AeTitleProcessor {
    fn name(&self) -> &str {
        Self::PROCESSOR_NAME
    }

    fn ae_title(&self) -> &AeTitle {
        &self.ae_title
    }

    fn handle_instance(&self, info: InstanceStorageInfo) {
        let group_value = self.group_value(&info);
        let is_new_window = self.accumulator.record(&group_value, info);
        if !is_new_window {
            return;
        }

        let accumulator = Arc::clone(&self.accumulator);
        let cancel = self.cancel.clone();
        let ae_title = self.ae_title.clone();
        let pipelines = self.pipelines.clone();
        let priority_byte = self.priority_byte;
        let repository = Arc::clone(&self.repository);
        let group_value_for_emit = group_value.clone();

        tokio::spawn(async move {
            accumulator
                .run_window(group_value, cancel, move |instances| {
                    tokio::spawn(emit_window(
                        repository,
                        ae_title,
                        pipelines,
                        priority_byte,
                        group_value_for_emit,
                        instances,
                    ));
                })
                .await;
        });
    }
}

fn dummy_instance() -> InstanceStorageInfo {
    use crate::types::Uid;
    InstanceStorageInfo {
        sop_instance_uid: Uid::from_static("0"),
        study_instance_uid: Uid::from_static("0"),
        series_instance_uid: Uid::from_static("0"),
        patient_id: String::new(),
        sop_class_uid: Uid::from_static("0"),
        called_ae_title: AeTitle::from_static("X"),
        association_id: 0,
        storage_path: camino::Utf8PathBuf::from("/"),
    }
}

fn resolve_group_value(tag: &str, info: &InstanceStorageInfo) -> Result<String, ()> {
    match tag {
        "0020,000D" => Ok(info.study_instance_uid.as_str().to_string()),
        "0020,000E" => Ok(info.series_instance_uid.as_str().to_string()),
        "0010,0020" => Ok(info.patient_id.clone()),
        _ => Err(()),
    }
}

fn parse_timeout(ae: &LocalApplicationEntity) -> Result<u64, ConfigurationError> {
    match ae.setting("timeout") {
        Some(v) => v
            .parse()
            .map_err(|_| invalid_setting("timeout", v, "not an integer")),
        None => Ok(DEFAULT_TIMEOUT_SECS),
    }
}

fn parse_priority_byte(ae: &LocalApplicationEntity) -> Result<u8, ConfigurationError> {
    let configured = match ae.setting("priority") {
        Some(v) => v.parse::<ConfiguredPriority>()?,
        None => ConfiguredPriority::Normal,
    };
    Ok(match configured {
        ConfiguredPriority::Lower => 0,
        ConfiguredPriority::Normal => 128,
        ConfiguredPriority::Higher => 200,
        ConfiguredPriority::Immediate => 255,
    })
}

fn invalid_setting(key: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidSettingValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
