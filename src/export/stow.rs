//! DICOMweb STOW-RS transmission for the export pipeline's DICOMweb variant
//! (section 4.7): chunks files into groups of 10, each chunk's HTTP status
//! applying to the whole group.

use crate::dicomweb::{Auth, DicomWebClient};

const CHUNK_SIZE: usize = 10;

pub struct StowOutcome {
    pub successful: usize,
    pub failed: usize,
}

pub async fn export_via_stow(
    dicomweb: &DicomWebClient,
    base_uri: &str,
    files: Vec<bytes::Bytes>,
) -> StowOutcome {
    let mut successful = 0;
    let mut failed = 0;

    for chunk in files.chunks(CHUNK_SIZE) {
        match dicomweb.stow(base_uri, &Auth::None, None, chunk).await {
            Ok(()) => successful += chunk.len(),
            Err(e) => {
                tracing::warn!(event = "export", base_uri, error = %e, "STOW chunk rejected");
                failed += chunk.len();
            }
        }
    }

    StowOutcome { successful, failed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_matches_section_4_7() {
        assert_eq!(CHUNK_SIZE, 10);
    }
}
