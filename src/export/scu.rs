//! DIMSE SCU transmission for the export pipeline's SCU variant (section
//! 4.7): one association per `OutputJob`, synchronous under the hood since
//! `dicom-ul`'s client association API has no async establish, run inside
//! `spawn_blocking` the way `oxidicom` runs its own blocking DICOM work.

use dicom::core::{dicom_value, DataElement, VR};
use dicom::dictionary_std::tags;
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::{DefaultDicomObject, InMemDicomObject};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom::ul::pdu::{PDataValue, PDataValueType};
use dicom::ul::{ClientAssociationOptions, Pdu};

use crate::model::DestinationApplicationEntity;

/// One file pending transmission, already downloaded and parsed.
pub struct PendingFile {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub transfer_syntax: String,
    pub object: DefaultDicomObject,
}

pub struct ScuOutcome {
    pub successful: usize,
    pub failed: usize,
}

/// Transmits `files` to `destination` over a single association. Files
/// whose SOP class has no acceptable presentation context are counted as
/// failed without ever being sent; section 4.7 does not distinguish this
/// from a rejected C-STORE-RSP.
pub fn export_via_scu(
    destination: &DestinationApplicationEntity,
    calling_ae_title: &str,
    max_pdu_length: u32,
    files: Vec<PendingFile>,
) -> anyhow::Result<ScuOutcome> {
    if files.is_empty() {
        return Ok(ScuOutcome { successful: 0, failed: 0 });
    }

    let mut options = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title)
        .called_ae_title(destination.ae_title.as_str())
        .max_pdu_length(max_pdu_length);

    let mut abstract_syntaxes: Vec<String> = files.iter().map(|f| f.sop_class_uid.clone()).collect();
    abstract_syntaxes.sort();
    abstract_syntaxes.dedup();
    for abstract_syntax in &abstract_syntaxes {
        options = options.with_presentation_context(
            abstract_syntax.clone(),
            vec![
                "1.2.840.10008.1.2.1".to_string(),
                "1.2.840.10008.1.2".to_string(),
            ],
        );
    }

    let address = format!("{}:{}", destination.host_ip, destination.port);
    let mut association = options.establish_with(&address)?;

    let mut successful = 0;
    let mut failed = 0;
    let mut message_id: u16 = 1;

    for file in files {
        let accepted = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.transfer_syntax == file.transfer_syntax || pc.transfer_syntax == "1.2.840.10008.1.2.1");
        let Some(pc) = accepted else {
            failed += 1;
            continue;
        };

        let command = store_request_command(&file.sop_class_uid, &file.sop_instance_uid, message_id);
        message_id = message_id.wrapping_add(1);

        let mut command_bytes = Vec::new();
        if command
            .write_dataset_with_ts(&mut command_bytes, &dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .is_err()
        {
            failed += 1;
            continue;
        }

        let Some(ts) = TransferSyntaxRegistry.get(&pc.transfer_syntax) else {
            failed += 1;
            continue;
        };
        let mut dataset_bytes = Vec::new();
        if file.object.write_dataset_with_ts(&mut dataset_bytes, ts).is_err() {
            failed += 1;
            continue;
        }

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

        if association.send(&pdu).is_err() {
            failed += 1;
            continue;
        }

        match association.receive() {
            Ok(Pdu::PData { data }) => match response_status(&data) {
                Some(0) => successful += 1,
                _ => failed += 1,
            },
            _ => failed += 1,
        }
    }

    let _ = association.release();
    Ok(ScuOutcome { successful, failed })
}

fn response_status(data: &[PDataValue]) -> Option<u16> {
    let value = data.first()?;
    let command = InMemDicomObject::read_dataset_with_ts(
        &value.data[..],
        &dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
    )
    .ok()?;
    command.element(tags::STATUS).ok()?.to_int::<u16>().ok()
}

fn store_request_command(
    sop_class_uid: &str,
    sop_instance_uid: &str,
    message_id: u16,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0001])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, sop_instance_uid)),
    ])
}

/// Parses a downloaded payload file into a `PendingFile`, or `None` on
/// parse failure (section 4.7: "warn and skip, does not count as an
/// export failure").
pub fn parse_pending_file(bytes: &[u8]) -> Option<PendingFile> {
    let object = dicom::object::from_reader(std::io::Cursor::new(bytes)).ok()?;
    let sop_class_uid = object.element(tags::SOP_CLASS_UID).ok()?.to_str().ok()?.to_string();
    let sop_instance_uid = object.element(tags::SOP_INSTANCE_UID).ok()?.to_str().ok()?.to_string();
    let transfer_syntax = object.meta().transfer_syntax.trim_end_matches('\0').to_string();
    Some(PendingFile {
        sop_class_uid,
        sop_instance_uid,
        transfer_syntax,
        object,
    })
}
