//! Per-association handler (section 4.1): presentation context negotiation,
//! C-ECHO/C-STORE PDU handling, adapted from `oxidicom`'s raw-PDU pattern
//! onto `dicom-ul`'s async association API.

use std::collections::HashMap;
use std::sync::Arc;

use dicom::core::{dicom_value, DataElement, VR};
use dicom::dictionary_std::{tags, StandardDataDictionary};
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom::ul::pdu::PDataValueType;
use dicom::ul::Pdu;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::KeyValue;
use tokio::net::TcpStream;

use tokio_util::sync::CancellationToken;

use crate::ae_handler::AeHandler;
use crate::health::HealthReporter;
use crate::job_processor::ProcessorRegistry;
use crate::model::InstanceStorageInfo;
use crate::repository::Repository;
use crate::storage_info::StorageInfoProvider;
use crate::types::{AeTitle, Uid};

use super::admission::admit;
use super::association::AssociationIdSequence;
use super::status::{DimseStatus, RejectReason};

pub static VERIFICATION_ABSTRACT_SYNTAX: &str = "1.2.840.10008.1.1";

/// Storage SOP classes accepted for C-STORE. Grounded on `oxidicom`'s own
/// `ABSTRACT_SYNTAXES` list (`src/transfer.rs`), covering the common
/// imaging/SR/presentation-state classes.
pub static STORAGE_ABSTRACT_SYNTAXES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.2",    // CT Image Storage
    "1.2.840.10008.5.1.4.1.1.2.1",  // Enhanced CT Image Storage
    "1.2.840.10008.5.1.4.1.1.8",    // Standalone Curve Storage (retired)
    "1.2.840.10008.5.1.4.1.1.9",    // Standalone Overlay Storage (retired)
    "1.2.840.10008.5.1.4.1.1.7",    // Secondary Capture Image Storage
    "1.2.840.10008.5.1.4.1.1.6.1",  // Ultrasound Image Storage (retired)
    "1.2.840.10008.5.1.4.1.1.5",    // Nuclear Medicine Image Storage (retired)
    "1.2.840.10008.5.1.4.1.1.4",    // MR Image Storage
    "1.2.840.10008.5.1.4.1.1.4.1",  // Enhanced MR Image Storage
    "1.2.840.10008.5.1.4.1.1.4.2",  // MR Spectroscopy Storage
    "1.2.840.10008.5.1.4.1.1.4.3",  // Enhanced MR Color Image Storage
    "1.2.840.10008.5.1.4.1.1.3.1",  // Ultrasound Multi-frame Image Storage
    "1.2.840.10008.5.1.4.1.1.1",    // Computed Radiography Image Storage
    "1.2.840.10008.5.1.4.1.1.1.1",  // Digital X-Ray Image Storage For Presentation
    "1.2.840.10008.5.1.4.1.1.1.1.1", // Digital X-Ray Image Storage For Processing
    "1.2.840.10008.5.1.4.1.1.104.1", // Encapsulated PDF Storage
    "1.2.840.10008.5.1.4.1.1.104.2", // Encapsulated CDA Storage
    "1.2.840.10008.5.1.4.1.1.104.3", // Encapsulated STL Storage
    "1.2.840.10008.5.1.4.1.1.11.1", // Grayscale Softcopy Presentation State Storage
    "1.2.840.10008.5.1.4.1.1.128",  // Positron Emission Tomography Image Storage
    "1.2.840.10008.5.1.4.1.1.13.1.3", // Breast Tomosynthesis Image Storage
    "1.2.840.10008.5.1.4.1.1.13.1.4", // Breast Projection X-Ray Image Storage For Presentation
    "1.2.840.10008.5.1.4.1.1.13.1.5", // Breast Projection X-Ray Image Storage For Processing
    "1.2.840.10008.5.1.4.1.1.130", // Enhanced PET Image Storage
    "1.2.840.10008.5.1.4.1.1.481.1", // RT Image Storage
    "1.2.840.10008.5.1.4.1.1.20",  // Nuclear Medicine Image Storage
    "1.2.840.10008.5.1.4.1.1.3.1", // Ultrasound Multi-frame Image Storage
    "1.2.840.10008.5.1.4.1.1.7.1", // Multi-frame Single Bit SC Image Storage
    "1.2.840.10008.5.1.4.1.1.7.2", // Multi-frame Grayscale Byte SC Image Storage
    "1.2.840.10008.5.1.4.1.1.7.3", // Multi-frame Grayscale Word SC Image Storage
    "1.2.840.10008.5.1.4.1.1.7.4", // Multi-frame True Color SC Image Storage
    "1.2.840.10008.5.1.4.1.1.88.11", // Basic Text SR Storage
    "1.2.840.10008.5.1.4.1.1.88.22", // Enhanced SR Storage
    "1.2.840.10008.5.1.4.1.1.88.33", // Comprehensive SR Storage
];

pub struct ScpConfig {
    pub calling_ae_title: String,
    pub strict: bool,
    pub max_pdu_length: u32,
    pub reject_unknown_sources: bool,
    pub verification_enabled: bool,
    /// TS UIDs accepted for C-ECHO (`scp.verification.transferSyntaxes`).
    /// Empty means Implicit/Explicit VR Little Endian only.
    pub verification_transfer_syntaxes: Vec<String>,
    pub temporary_root: camino::Utf8PathBuf,
    pub processor_registry: Arc<ProcessorRegistry>,
}

/// The TS UIDs offered for C-ECHO when `scp.verification.transferSyntaxes`
/// is unset, the pair every DICOM peer is required to support.
const DEFAULT_VERIFICATION_TRANSFER_SYNTAXES: &[&str] = &[
    "1.2.840.10008.1.2",   // Implicit VR Little Endian
    "1.2.840.10008.1.2.1", // Explicit VR Little Endian
];

/// Runs one association start-to-finish. Errors are logged by the caller;
/// this function only returns `Err` for conditions that prevented the
/// association from being established at all.
pub async fn handle_association(
    stream: TcpStream,
    repository: Arc<dyn Repository>,
    storage_info: Arc<StorageInfoProvider>,
    ae_handlers: Arc<tokio::sync::Mutex<HashMap<AeTitle, AeHandlerEntry>>>,
    health: HealthReporter,
    association_ids: AssociationIdSequence,
    config: Arc<ScpConfig>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let remote_host = stream
        .peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_default();

    // Admission steps 1-2 (calling/called AE) are association-level: a
    // failure here must reject the association itself, before `dicom-ul`
    // sends an A-ASSOCIATE-AC. `establish_async` below has no hook for
    // this, so the two AE titles are read directly off the still-unread
    // A-ASSOCIATE-RQ via a peek, and a real A-ASSOCIATE-RJ is written by
    // hand on rejection instead of ever negotiating the association.
    if let Some((called_ae_title, calling_ae_title)) = peek_association_rq_ae_titles(&stream).await {
        if let Err(rejection) = admit(
            repository.as_ref(),
            storage_info.as_ref(),
            config.reject_unknown_sources,
            &calling_ae_title,
            &remote_host,
            &called_ae_title,
        )
        .await
        {
            tracing::info!(
                event = "association",
                calling_ae_title,
                called_ae_title,
                remote_host,
                reason = %rejection.reason,
                "rejected association at negotiation"
            );
            send_association_reject(&stream, rejection.reason).await?;
            return Ok(());
        }
    }

    let mut options = dicom::ul::association::ServerAssociationOptions::new()
        .accept_any()
        .ae_title(&config.calling_ae_title)
        .strict(config.strict)
        .max_pdu_length(config.max_pdu_length);

    for ts in TransferSyntaxRegistry.iter() {
        if !ts.is_unsupported() {
            options = options.with_transfer_syntax(ts.uid());
        }
    }
    if config.verification_enabled {
        options = options.with_abstract_syntax(VERIFICATION_ABSTRACT_SYNTAX);
    }
    for sop_class_uid in STORAGE_ABSTRACT_SYNTAXES {
        options = options.with_abstract_syntax(*sop_class_uid);
    }

    let mut association = options.establish_async(stream).await?;
    let calling_ae_title = association.client_ae_title().to_string();

    let association_id = association_ids.next_id();
    let context = opentelemetry::Context::current();
    context.span().set_attribute(KeyValue::new("association_id", association_id as i64));
    context.span().set_attribute(KeyValue::new("calling_ae_title", calling_ae_title.clone()));

    health.association_opened();
    let result = run_association_loop(
        &mut association,
        &repository,
        &storage_info,
        &ae_handlers,
        association_id,
        &calling_ae_title,
        &remote_host,
        &config,
        &cancel,
    )
    .await;
    health.association_closed();

    result
}

#[allow(clippy::too_many_arguments)]
async fn run_association_loop(
    association: &mut dicom::ul::ServerAssociation<TcpStream>,
    repository: &Arc<dyn Repository>,
    storage_info: &Arc<StorageInfoProvider>,
    ae_handlers: &Arc<tokio::sync::Mutex<HashMap<AeTitle, AeHandlerEntry>>>,
    association_id: u32,
    calling_ae_title: &str,
    remote_host: &str,
    config: &ScpConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut instance_buffer: Vec<u8> = Vec::with_capacity(1024 * 1024);
    let mut msgid: u16 = 1;
    let mut affected_sop_class_uid = String::new();
    let mut affected_sop_instance_uid = String::new();

    loop {
        let pdu = match association.receive().await {
            Ok(pdu) => pdu,
            Err(dicom::ul::association::server::Error::Receive { .. }) => break,
            Err(e) => return Err(e.into()),
        };

        match pdu {
            Pdu::PData { mut data } => {
                if data.is_empty() {
                    continue;
                }
                let data_value = &mut data[0];
                if data_value.value_type == PDataValueType::Data && !data_value.is_last {
                    instance_buffer.append(&mut data_value.data);
                } else if data_value.value_type == PDataValueType::Command && data_value.is_last {
                    let ts = dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
                    let obj = InMemDicomObject::read_dataset_with_ts(
                        data_value.data.as_slice(),
                        &ts,
                    )?;
                    let command_field = obj.element(tags::COMMAND_FIELD)?.uint16()?;

                    if command_field == 0x0030 {
                        let status = if verification_transfer_syntax_allowed(
                            association,
                            data_value.presentation_context_id,
                            config,
                        ) {
                            DimseStatus::Success
                        } else {
                            DimseStatus::ProcessingFailure
                        };
                        send_cecho_response(
                            association,
                            data_value.presentation_context_id,
                            msgid,
                            status,
                        )
                        .await?;
                    } else {
                        msgid = obj.element(tags::MESSAGE_ID)?.to_int()?;
                        affected_sop_class_uid = obj
                            .element(tags::AFFECTED_SOP_CLASS_UID)?
                            .to_str()?
                            .to_string();
                        affected_sop_instance_uid = obj
                            .element(tags::AFFECTED_SOP_INSTANCE_UID)?
                            .to_str()?
                            .to_string();
                    }
                    instance_buffer.clear();
                } else if data_value.value_type == PDataValueType::Data && data_value.is_last {
                    instance_buffer.append(&mut data_value.data);

                    let status = handle_cstore(
                        association,
                        &instance_buffer,
                        data_value.presentation_context_id,
                        repository,
                        storage_info,
                        ae_handlers,
                        association_id,
                        calling_ae_title,
                        remote_host,
                        config,
                        cancel,
                    )
                    .await
                    .unwrap_or(DimseStatus::ProcessingFailure);

                    send_cstore_response(
                        association,
                        data_value.presentation_context_id,
                        msgid,
                        &affected_sop_class_uid,
                        &affected_sop_instance_uid,
                        status,
                    )
                    .await?;
                    instance_buffer.clear();
                }
            }
            Pdu::ReleaseRQ => {
                let _ = association.send(&Pdu::ReleaseRP).await;
                break;
            }
            Pdu::AbortRQ { .. } => break,
            _ => {}
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_cstore(
    association: &dicom::ul::ServerAssociation<TcpStream>,
    instance_bytes: &[u8],
    presentation_context_id: u8,
    repository: &Arc<dyn Repository>,
    storage_info: &Arc<StorageInfoProvider>,
    ae_handlers: &Arc<tokio::sync::Mutex<HashMap<AeTitle, AeHandlerEntry>>>,
    association_id: u32,
    calling_ae_title: &str,
    remote_host: &str,
    config: &ScpConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<DimseStatus> {
    let presentation_context = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.id == presentation_context_id)
        .ok_or_else(|| anyhow::anyhow!("missing presentation context"))?;
    let ts_uid = presentation_context.transfer_syntax.clone();
    let ts = TransferSyntaxRegistry
        .get(&ts_uid)
        .ok_or_else(|| anyhow::anyhow!("unregistered transfer syntax"))?;

    let obj = InMemDicomObject::read_dataset_with_ts(instance_bytes, ts)?;

    let sop_class_uid = obj.element(tags::SOP_CLASS_UID)?.to_str()?.to_string();
    let sop_instance_uid = obj.element(tags::SOP_INSTANCE_UID)?.to_str()?.to_string();
    let study_instance_uid = obj.element(tags::STUDY_INSTANCE_UID)?.to_str()?.to_string();
    let series_instance_uid = obj.element(tags::SERIES_INSTANCE_UID)?.to_str()?.to_string();
    let patient_id = obj
        .element(tags::PATIENT_ID)
        .and_then(|e| e.to_str().map(|s| s.to_string()))
        .unwrap_or_default();

    let called_ae_title = association.called_ae_title().to_string();

    let decision = admit(
        repository.as_ref(),
        storage_info,
        config.reject_unknown_sources,
        calling_ae_title,
        remote_host,
        &called_ae_title,
    )
    .await
    .map_err(|rejection| anyhow::anyhow!("{}", rejection.reason))?;

    if decision.resource_limited {
        return Ok(DimseStatus::ResourceLimitation);
    }

    let handler = ae_handler_for(
        ae_handlers,
        &decision.local_ae,
        config,
        Arc::clone(repository),
        cancel.clone(),
    )
    .await;
    let storage_path = handler.storage_path_for(&sop_instance_uid);

    let info = InstanceStorageInfo {
        sop_instance_uid: Uid::from(sop_instance_uid),
        study_instance_uid: Uid::from(study_instance_uid),
        series_instance_uid: Uid::from(series_instance_uid),
        patient_id,
        sop_class_uid: Uid::from(sop_class_uid),
        called_ae_title: decision.local_ae.ae_title.clone(),
        association_id,
        storage_path,
    };

    let file_meta = FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(info.sop_class_uid.as_str())
        .media_storage_sop_instance_uid(info.sop_instance_uid.as_str())
        .transfer_syntax(&ts_uid)
        .build()?;
    let file_obj = obj.with_exact_meta(file_meta);
    let mut bytes = Vec::new();
    file_obj.write_all(&mut bytes).map_err(|e| anyhow::anyhow!("{e}"))?;

    match handler.handle_instance(info, &bytes).await {
        Ok(_) => Ok(DimseStatus::Success),
        Err(e) if e.kind() == std::io::ErrorKind::StorageFull => Ok(DimseStatus::ResourceLimitation),
        Err(_) => Ok(DimseStatus::ProcessingFailure),
    }
}

/// A constructed `AeHandler` together with the subscription feeding its
/// notifications into the local AE's configured `Processor`. The
/// subscription is kept alive for as long as the entry is, since dropping it
/// would silently stop job grouping for that AE.
pub struct AeHandlerEntry {
    handler: Arc<AeHandler>,
    _subscription: crate::notification_bus::Subscription<InstanceStorageInfo>,
}

async fn ae_handler_for(
    ae_handlers: &Arc<tokio::sync::Mutex<HashMap<AeTitle, AeHandlerEntry>>>,
    local_ae: &crate::model::LocalApplicationEntity,
    config: &ScpConfig,
    repository: Arc<dyn Repository>,
    cancel: CancellationToken,
) -> Arc<AeHandler> {
    let mut handlers = ae_handlers.lock().await;
    if let Some(entry) = handlers.get(&local_ae.ae_title) {
        return Arc::clone(&entry.handler);
    }

    let handler = Arc::new(AeHandler::new(local_ae.clone(), &config.temporary_root));
    if let Err(e) = handler.cold_start_cleanup().await {
        tracing::warn!(event = "ae_handler", ae_title = %local_ae.ae_title.as_str(), error = %e, "failed to clean up storage subtree");
    }

    let processor = match config.processor_registry.construct(local_ae.clone(), repository, cancel) {
        Ok(processor) => processor,
        Err(e) => {
            tracing::error!(event = "ae_handler", ae_title = %local_ae.ae_title.as_str(), error = %e, "failed to construct processor, instances will be stored but not grouped into jobs");
            let entry = AeHandlerEntry {
                handler: Arc::clone(&handler),
                _subscription: handler.notification_bus().subscribe(|_| {}),
            };
            handlers.insert(local_ae.ae_title.clone(), entry);
            return handler;
        }
    };
    let subscription = handler
        .notification_bus()
        .subscribe(move |info| processor.handle_instance(info.clone()));

    let entry = AeHandlerEntry {
        handler: Arc::clone(&handler),
        _subscription: subscription,
    };
    handlers.insert(local_ae.ae_title.clone(), entry);
    handler
}

async fn send_cecho_response(
    association: &mut dicom::ul::ServerAssociation<TcpStream>,
    presentation_context_id: u8,
    message_id: u16,
    status: DimseStatus,
) -> anyhow::Result<()> {
    let response = InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8030])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0101])),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status.code()])),
    ]);
    send_command(association, presentation_context_id, response).await
}

/// `dicom-ul`'s `accept_any()` builder negotiates one TS list shared across
/// every abstract syntax (confirmed against every `ServerAssociationOptions`
/// user in the example pack: none offers a narrower TS set per abstract
/// syntax), so `scp.verification.transferSyntaxes` cannot be enforced at
/// negotiation time the way `STORAGE_ABSTRACT_SYNTAXES` is. This re-checks
/// the negotiated TS for the Verification presentation context once the
/// C-ECHO itself arrives, the same second-layer pattern `handle_cstore` uses
/// for the storage-threshold recheck that also can't happen at negotiation.
fn verification_transfer_syntax_allowed(
    association: &dicom::ul::ServerAssociation<TcpStream>,
    presentation_context_id: u8,
    config: &ScpConfig,
) -> bool {
    let Some(presentation_context) = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.id == presentation_context_id)
    else {
        return false;
    };
    let allowed: &[String] = &config.verification_transfer_syntaxes;
    if allowed.is_empty() {
        return DEFAULT_VERIFICATION_TRANSFER_SYNTAXES.contains(&presentation_context.transfer_syntax.as_str());
    }
    allowed.iter().any(|ts| ts == &presentation_context.transfer_syntax)
}

async fn send_cstore_response(
    association: &mut dicom::ul::ServerAssociation<TcpStream>,
    presentation_context_id: u8,
    message_id: u16,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    status: DimseStatus,
) -> anyhow::Result<()> {
    let response = InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8001])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0101])),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status.code()])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Str, sop_instance_uid),
        ),
    ]);
    send_command(association, presentation_context_id, response).await
}

async fn send_command(
    association: &mut dicom::ul::ServerAssociation<TcpStream>,
    presentation_context_id: u8,
    command: InMemDicomObject<StandardDataDictionary>,
) -> anyhow::Result<()> {
    let ts = dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut data = Vec::new();
    command.write_dataset_with_ts(&mut data, &ts)?;
    let pdu = Pdu::PData {
        data: vec![dicom::ul::pdu::PDataValue {
            presentation_context_id,
            value_type: PDataValueType::Command,
            is_last: true,
            data,
        }],
    };
    association.send(&pdu).await?;
    Ok(())
}

/// Reads the Called/Calling AE title fields straight off the wire without
/// consuming them, so `establish_async` can still read the same
/// A-ASSOCIATE-RQ afterward if admission passes. Per PS3.8 9.3.2, an
/// A-ASSOCIATE-RQ's fixed header is: 1-byte PDU type (`0x01`), 1 reserved
/// byte, a 4-byte big-endian PDU length, a 2-byte protocol version, 2
/// reserved bytes, a 16-byte Called-AE-title, then a 16-byte
/// Calling-AE-title — all at fixed offsets regardless of the variable
/// item list that follows. Returns `None` if the header never fully
/// arrives or the PDU type isn't 0x01, leaving the decision to
/// `establish_async` as before.
async fn peek_association_rq_ae_titles(stream: &TcpStream) -> Option<(String, String)> {
    const HEADER_LEN: usize = 42;
    let mut buf = [0u8; HEADER_LEN];
    for _ in 0..50 {
        match stream.peek(&mut buf).await {
            Ok(n) if n >= HEADER_LEN => {
                if buf[0] != 0x01 {
                    return None;
                }
                let called = String::from_utf8_lossy(&buf[10..26]).trim().to_string();
                let calling = String::from_utf8_lossy(&buf[26..42]).trim().to_string();
                return Some((called, calling));
            }
            Ok(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            Err(_) => return None,
        }
    }
    None
}

/// Writes a standards-conformant A-ASSOCIATE-RJ PDU (PS3.8 9.3.4) directly
/// to the stream and closes it, bypassing `dicom-ul`'s association API
/// entirely since no association was ever negotiated.
async fn send_association_reject(stream: &TcpStream, reason: RejectReason) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;

    let reason_code: u8 = match reason {
        RejectReason::ApplicationContextNotSupported => 2,
        RejectReason::CallingAeNotRecognized => 3,
        RejectReason::CalledAeNotRecognized => 7,
    };
    // result = 1 (rejected-permanent), source = 1 (DICOM UL service-user).
    let pdu: [u8; 10] = [0x03, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x01, 0x01, reason_code];
    let mut stream = stream;
    stream.write_all(&pdu).await?;
    stream.shutdown().await?;
    Ok(())
}
