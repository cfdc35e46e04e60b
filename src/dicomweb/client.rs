//! QIDO/WADO/STOW primitives (section 4.6).

use std::collections::HashMap;
use std::sync::Mutex;

use dicom::object::DefaultDicomObject;
use url::Url;

use super::auth::Auth;
use super::multipart::{build_stow_form, decode_json_array, decode_parts};
use crate::error::ProtocolError;
use crate::types::Uid;

#[derive(Debug, Clone, Default)]
pub struct QidoQuery {
    pub tags: Vec<(String, String)>,
    pub fuzzy_matching: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Pools one `reqwest::Client` per distinct source base URI, since each
/// source may need its own connection settings and this is the client's
/// own outbound-reuse analog of `UMEssen-DICOM-RST`'s inbound pooling.
pub struct DicomWebClient {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl Default for DicomWebClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DicomWebClient {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, base_uri: &str) -> reqwest::Client {
        let mut clients = self.clients.lock().unwrap();
        clients
            .entry(base_uri.to_string())
            .or_insert_with(|| {
                reqwest::ClientBuilder::new()
                    .use_rustls_tls()
                    .build()
                    .expect("reqwest client builds with rustls")
            })
            .clone()
    }

    /// Canonicalizes `base_uri` to end in `/`, so joining a relative path
    /// never drops the last path segment.
    fn root(base_uri: &str) -> Result<Url, ProtocolError> {
        let normalized = if base_uri.ends_with('/') {
            base_uri.to_string()
        } else {
            format!("{base_uri}/")
        };
        Url::parse(&normalized).map_err(|_| ProtocolError::UnexpectedMediaType(base_uri.to_string()))
    }

    fn apply_auth(builder: reqwest::RequestBuilder, auth: &Auth) -> reqwest::RequestBuilder {
        match auth.header_value() {
            Some(value) => builder.header(reqwest::header::AUTHORIZATION, value),
            None => builder,
        }
    }

    fn accept_header(transfer_syntaxes: &[String]) -> Option<String> {
        match transfer_syntaxes {
            [] => Some(
                r#"multipart/related; type="application/dicom"; transfer-syntax=1.2.840.10008.1.2.1"#
                    .to_string(),
            ),
            ts if ts.iter().any(|s| s == "*") => {
                Some(r#"multipart/related; type="application/dicom""#.to_string())
            }
            [ts] => Some(format!(
                r#"multipart/related; type="application/dicom"; transfer-syntax={ts}"#
            )),
            _ => Some(r#"multipart/related; type="application/dicom""#.to_string()),
        }
    }

    async fn wado_get(
        &self,
        base_uri: &str,
        path: &str,
        auth: &Auth,
        transfer_syntaxes: &[String],
    ) -> Result<Vec<DefaultDicomObject>, ProtocolError> {
        let url = Self::root(base_uri)?.join(path).map_err(|_| {
            ProtocolError::UnexpectedMediaType(format!("{base_uri}{path}"))
        })?;
        let mut builder = self.client_for(base_uri).get(url);
        if let Some(accept) = Self::accept_header(transfer_syntaxes) {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }
        builder = Self::apply_auth(builder, auth);
        let response = builder.send().await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        decode_parts(&content_type, response).await
    }

    pub async fn wado_study(
        &self,
        base_uri: &str,
        auth: &Auth,
        study_instance_uid: &Uid,
        transfer_syntaxes: &[String],
    ) -> Result<Vec<DefaultDicomObject>, ProtocolError> {
        self.wado_get(
            base_uri,
            &format!("studies/{}", study_instance_uid.as_str()),
            auth,
            transfer_syntaxes,
        )
        .await
    }

    pub async fn wado_series(
        &self,
        base_uri: &str,
        auth: &Auth,
        study_instance_uid: &Uid,
        series_instance_uid: &Uid,
        transfer_syntaxes: &[String],
    ) -> Result<Vec<DefaultDicomObject>, ProtocolError> {
        self.wado_get(
            base_uri,
            &format!(
                "studies/{}/series/{}",
                study_instance_uid.as_str(),
                series_instance_uid.as_str()
            ),
            auth,
            transfer_syntaxes,
        )
        .await
    }

    pub async fn wado_instance(
        &self,
        base_uri: &str,
        auth: &Auth,
        study_instance_uid: &Uid,
        series_instance_uid: &Uid,
        sop_instance_uid: &Uid,
        transfer_syntaxes: &[String],
    ) -> Result<Vec<DefaultDicomObject>, ProtocolError> {
        self.wado_get(
            base_uri,
            &format!(
                "studies/{}/series/{}/instances/{}",
                study_instance_uid.as_str(),
                series_instance_uid.as_str(),
                sop_instance_uid.as_str()
            ),
            auth,
            transfer_syntaxes,
        )
        .await
    }

    /// Byte-range bulkdata retrieval (`Range: bytes=<start>-[<end>]`).
    pub async fn retrieve_bulkdata_range(
        &self,
        base_uri: &str,
        auth: &Auth,
        bulkdata_uri: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<bytes::Bytes, ProtocolError> {
        let url = Self::root(base_uri)?
            .join(bulkdata_uri)
            .map_err(|_| ProtocolError::UnexpectedMediaType(bulkdata_uri.to_string()))?;
        let range = match end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        };
        let mut builder = self.client_for(base_uri).get(url).header(reqwest::header::RANGE, range);
        builder = Self::apply_auth(builder, auth);
        let response = builder.send().await?;
        Ok(response.bytes().await?)
    }

    async fn metadata_get(
        &self,
        base_uri: &str,
        path: &str,
        auth: &Auth,
    ) -> Result<Vec<serde_json::Value>, ProtocolError> {
        let url = Self::root(base_uri)?
            .join(path)
            .map_err(|_| ProtocolError::UnexpectedMediaType(format!("{base_uri}{path}")))?;
        let mut builder = self
            .client_for(base_uri)
            .get(url)
            .header(reqwest::header::ACCEPT, "application/dicom+json");
        builder = Self::apply_auth(builder, auth);
        let response = builder.send().await?;
        decode_json_array(response).await
    }

    pub async fn wado_study_metadata(
        &self,
        base_uri: &str,
        auth: &Auth,
        study_instance_uid: &Uid,
    ) -> Result<Vec<serde_json::Value>, ProtocolError> {
        self.metadata_get(
            base_uri,
            &format!("studies/{}/metadata", study_instance_uid.as_str()),
            auth,
        )
        .await
    }

    /// QIDO studies search.
    pub async fn qido_studies(
        &self,
        base_uri: &str,
        auth: &Auth,
        query: &QidoQuery,
    ) -> Result<Vec<serde_json::Value>, ProtocolError> {
        let root = Self::root(base_uri)?;
        let mut url = root
            .join("studies/")
            .map_err(|_| ProtocolError::UnexpectedMediaType(base_uri.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (tag, value) in &query.tags {
                pairs.append_pair(tag, value);
            }
            if query.fuzzy_matching {
                pairs.append_pair("fuzzymatching", "true");
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            if let Some(offset) = query.offset {
                pairs.append_pair("offset", &offset.to_string());
            }
        }
        let mut builder = self
            .client_for(base_uri)
            .get(url)
            .header(reqwest::header::ACCEPT, "application/dicom+json");
        builder = Self::apply_auth(builder, auth);
        let response = builder.send().await?;
        decode_json_array(response).await
    }

    /// STOW-RS: POSTs `files` to `studies/` (or `studies/<uid>/` when
    /// `study_instance_uid` is given). A 200 response means every instance
    /// stored; anything else is a partial-failure error (section 4.6).
    pub async fn stow(
        &self,
        base_uri: &str,
        auth: &Auth,
        study_instance_uid: Option<&Uid>,
        files: &[bytes::Bytes],
    ) -> Result<(), ProtocolError> {
        let path = match study_instance_uid {
            Some(uid) => format!("studies/{}/", uid.as_str()),
            None => "studies/".to_string(),
        };
        let url = Self::root(base_uri)?
            .join(&path)
            .map_err(|_| ProtocolError::UnexpectedMediaType(format!("{base_uri}{path}")))?;
        let form = build_stow_form(files);
        let mut builder = self.client_for(base_uri).post(url).multipart(form);
        builder = Self::apply_auth(builder, auth);
        let response = builder.send().await?;
        if response.status() == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(ProtocolError::StowPartialFailure(response.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_header_defaults_to_explicit_vr_little_endian() {
        let header = DicomWebClient::accept_header(&[]).unwrap();
        assert!(header.contains("1.2.840.10008.1.2.1"));
    }

    #[test]
    fn test_accept_header_wildcard_has_no_transfer_syntax_param() {
        let header = DicomWebClient::accept_header(&["*".to_string()]).unwrap();
        assert!(!header.contains("transfer-syntax"));
    }

    #[test]
    fn test_accept_header_single_ts_is_passed_through() {
        let header = DicomWebClient::accept_header(&["1.2.840.10008.1.2".to_string()]).unwrap();
        assert!(header.contains("1.2.840.10008.1.2"));
    }

    #[test]
    fn test_root_canonicalizes_trailing_slash() {
        let url = DicomWebClient::root("http://example.com/dicomweb").unwrap();
        assert_eq!(url.as_str(), "http://example.com/dicomweb/");
    }
}
