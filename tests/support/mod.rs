//! Shared fixtures for the end-to-end scenario tests (section 8). Builds
//! real-but-disposable collaborators the way `oxidicom`'s own
//! `tests/util` module does: a real DIMSE client to drive the listener
//! under test, plain DICOM objects for payloads, and hand-written fakes
//! for the platform/DICOMweb seams that sit outside this crate's scope.

use std::sync::Once;

use dicom::core::{dicom_value, DataElement, VR};
use dicom::dictionary_std::tags;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries;
use dicom::ul::pdu::{PDataValue, PDataValueType};
use dicom::ul::{ClientAssociationOptions, Pdu};
use tokio::net::TcpStream;

static INIT_LOGGING: Once = Once::new();

pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Binds an ephemeral port and releases it immediately so a test's
/// `dimse_listener`/stub server can claim it. Good enough for a
/// single-process test binary: nothing else grabs the port between the
/// bind-then-drop and the real bind a few lines later.
pub fn free_tcp_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// One un-stored DICOM instance, identified by the handful of tags this
/// service actually reads (section 1 non-goal: no deeper tag interpretation).
pub struct TestInstance {
    pub sop_class_uid: &'static str,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    pub patient_id: &'static str,
}

impl TestInstance {
    pub fn new(study: &str, series: &str, sop_instance: &str) -> Self {
        Self {
            // Secondary Capture Image Storage; one of the SOP classes
            // `STORAGE_ABSTRACT_SYNTAXES` (section 4.1) always registers.
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.7",
            study_instance_uid: study.to_string(),
            series_instance_uid: series.to_string(),
            sop_instance_uid: sop_instance.to_string(),
            patient_id: "TESTPAT",
        }
    }

    fn dataset(&self) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, self.sop_class_uid),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, self.study_instance_uid.as_str()),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, self.series_instance_uid.as_str()),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, self.sop_instance_uid.as_str()),
            DataElement::new(tags::PATIENT_ID, VR::LO, self.patient_id),
        ])
    }

    /// A complete on-disk-shaped file (file meta group + dataset), the same
    /// shape `handle_cstore` writes and `payloads_client.download` returns.
    pub fn full_file_bytes(&self) -> Vec<u8> {
        let file_meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(self.sop_class_uid)
            .media_storage_sop_instance_uid(self.sop_instance_uid.as_str())
            .transfer_syntax(entries::EXPLICIT_VR_LITTLE_ENDIAN.uid())
            .build()
            .unwrap();
        let file_obj = self.dataset().with_exact_meta(file_meta);
        let mut bytes = Vec::new();
        file_obj.write_all(&mut bytes).unwrap();
        bytes
    }
}

/// Attempts to establish an association and reports only whether
/// establishment itself succeeded, without sending any DIMSE message
/// afterward. Used for scenarios where admission must reject the
/// association before any C-STORE is ever proposed.
pub async fn try_establish(addr: &str, calling_ae: &str, called_ae: &str, sop_class_uid: &str) -> bool {
    ClientAssociationOptions::new()
        .calling_ae_title(calling_ae)
        .called_ae_title(called_ae)
        .max_pdu_length(16384)
        .with_presentation_context(sop_class_uid, vec![entries::IMPLICIT_VR_LITTLE_ENDIAN.uid()])
        .establish_with_async(addr)
        .await
        .is_ok()
}

/// Sends one C-STORE over a fresh association and returns the DIMSE status
/// code from the C-STORE-RSP. Adapted from `oxidicom`'s
/// `tests/util/send_dicom.rs`, generalized to hand back the status instead
/// of asserting it is always success, since these tests exercise both the
/// accept and reject paths.
pub async fn send_cstore(addr: &str, calling_ae: &str, called_ae: &str, instance: &TestInstance) -> u16 {
    let mut scu = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae)
        .called_ae_title(called_ae)
        .max_pdu_length(16384)
        .with_presentation_context(instance.sop_class_uid, vec![entries::IMPLICIT_VR_LITTLE_ENDIAN.uid()])
        .establish_with_async(addr)
        .await
        .unwrap();

    let dcm = instance.dataset();
    let sop_instance_uid = instance.sop_instance_uid.as_str();
    let message_id = 1u16;
    let pc = scu
        .presentation_contexts()
        .iter()
        .find(|pc| pc.transfer_syntax == entries::IMPLICIT_VR_LITTLE_ENDIAN.uid())
        .unwrap()
        .clone();

    let command = InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, instance.sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0001])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, sop_instance_uid)),
    ]);

    let mut command_bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut command_bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .unwrap();
    let mut dataset_bytes = Vec::new();
    dcm.write_dataset_with_ts(&mut dataset_bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .unwrap();

    let pdu = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: pc.id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: command_bytes,
            },
            PDataValue {
                presentation_context_id: pc.id,
                value_type: PDataValueType::Data,
                is_last: true,
                data: dataset_bytes,
            },
        ],
    };
    scu.send(&pdu).await.unwrap();

    let status = match scu.receive().await.unwrap() {
        Pdu::PData { data } => {
            let cmd_obj = InMemDicomObject::read_dataset_with_ts(
                &data[0].data[..],
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .unwrap();
            cmd_obj.element(tags::STATUS).unwrap().to_int::<u16>().unwrap()
        }
        other => panic!("expected C-STORE-RSP, got {other:?}"),
    };

    scu.release().await.unwrap();
    status
}

/// Sends one C-ECHO over a fresh association proposed with a single given
/// transfer syntax, and returns the DIMSE status code from the C-ECHO-RSP.
/// Used to exercise `scp.verification.transferSyntaxes` gating (section 3),
/// since `dicom-ul`'s `accept_any()` negotiates one TS list shared across
/// every abstract syntax, so a disallowed TS still negotiates a presentation
/// context and the rejection only surfaces in the C-ECHO response status.
pub async fn send_cecho(addr: &str, calling_ae: &str, called_ae: &str, transfer_syntax: &str) -> u16 {
    const VERIFICATION_ABSTRACT_SYNTAX: &str = "1.2.840.10008.1.1";

    let mut scu = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae)
        .called_ae_title(called_ae)
        .max_pdu_length(16384)
        .with_presentation_context(VERIFICATION_ABSTRACT_SYNTAX, vec![transfer_syntax])
        .establish_with_async(addr)
        .await
        .unwrap();

    let message_id = 1u16;
    let pc = scu.presentation_contexts()[0].clone();

    let command = InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, VERIFICATION_ABSTRACT_SYNTAX),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0030])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0101])),
    ]);
    let mut command_bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut command_bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .unwrap();

    let pdu = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: pc.id,
            value_type: PDataValueType::Command,
            is_last: true,
            data: command_bytes,
        }],
    };
    scu.send(&pdu).await.unwrap();

    let status = match scu.receive().await.unwrap() {
        Pdu::PData { data } => {
            let cmd_obj = InMemDicomObject::read_dataset_with_ts(
                &data[0].data[..],
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .unwrap();
            cmd_obj.element(tags::STATUS).unwrap().to_int::<u16>().unwrap()
        }
        other => panic!("expected C-ECHO-RSP, got {other:?}"),
    };

    scu.release().await.unwrap();
    status
}

/// A minimal HTTP/1.1 stub: accepts one connection, drains the request body
/// (by `Content-Length`, which `reqwest::multipart::Form` always sets for
/// in-memory parts), and replies with a fixed status line and no body.
/// Stands in for a DICOMweb STOW-RS receiver the way a hand-written fake
/// stands in for any other external collaborator in this test suite.
pub async fn serve_one_http_response(listener: TcpStream, status_line: &str) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = listener;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut content_length = None;
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find_header_end(&buf) {
            if content_length.is_none() {
                content_length = parse_content_length(&buf[..header_end]);
            }
            let body_len = buf.len() - header_end - 4;
            match content_length {
                Some(expected) if body_len >= expected => break,
                None => break,
                _ => continue,
            }
        }
    }

    let response = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(headers);
    text.lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|v| v.trim().parse().ok())
}
