//! `multipart/related` decode (WADO responses) and encode (STOW request
//! bodies), grounded on `UMEssen-DICOM-RST::utils::multipart`'s boundary
//! parsing, adapted from its inbound (server) direction to our outbound
//! (client) one.

use bytes::Bytes;
use dicom::object::{DefaultDicomObject, from_reader};
use futures::StreamExt;
use mime::Mime;

use crate::error::ProtocolError;

/// Validates the top-level media type is `multipart/related` and returns
/// its `boundary` parameter.
pub fn parse_boundary(content_type: &str) -> Result<String, ProtocolError> {
    let mime: Mime = content_type
        .parse()
        .map_err(|_| ProtocolError::UnexpectedMediaType(content_type.to_string()))?;
    if mime.type_() != mime::MULTIPART || mime.subtype().as_str() != "related" {
        return Err(ProtocolError::UnexpectedMediaType(content_type.to_string()));
    }
    mime.get_param("boundary")
        .map(|b| b.as_str().to_string())
        .ok_or_else(|| ProtocolError::UnexpectedMediaType(content_type.to_string()))
}

/// Decodes a `multipart/related` body into DICOM objects, one per part, in
/// arrival order. Each part's bytes are parsed as a standalone DICOM file
/// (the WADO part media type, `application/dicom`, has already been
/// negotiated via the `Accept` header).
pub async fn decode_parts(
    content_type: &str,
    body: reqwest::Response,
) -> Result<Vec<DefaultDicomObject>, ProtocolError> {
    let boundary = parse_boundary(content_type)?;
    let stream = body.bytes_stream();
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut objects = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ProtocolError::ResponseDecode(e.to_string()))?
    {
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ProtocolError::ResponseDecode(e.to_string()))?;
        let obj = from_reader(std::io::Cursor::new(bytes))?;
        objects.push(obj);
    }
    Ok(objects)
}

/// Decodes a `multipart/related` body of raw JSON text parts (not used by
/// this client today, since metadata responses are `application/dicom+json`
/// arrays rather than multipart, but kept alongside `decode_parts` since
/// both share the boundary-parsing step).
pub async fn decode_json_array(body: reqwest::Response) -> Result<Vec<serde_json::Value>, ProtocolError> {
    let bytes = body
        .bytes()
        .await
        .map_err(|e| ProtocolError::ResponseDecode(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ProtocolError::ResponseDecode(e.to_string()))
}

/// Builds a `multipart/related` request body for STOW-RS, one part per
/// DICOM file, each typed `application/dicom`.
pub fn build_stow_form(files: &[Bytes]) -> reqwest::multipart::Form {
    let mut form = reqwest::multipart::Form::new();
    for (i, bytes) in files.iter().enumerate() {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(format!("file{i}.dcm"))
            .mime_str("application/dicom")
            .expect("application/dicom is a valid mime type");
        form = form.part(format!("file{i}"), part);
    }
    form
}
