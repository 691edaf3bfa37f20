//! Upload body classification
//!
//! Controllers declare very little about what they send: content-type is
//! often missing and filenames are firmware-dependent. Classification runs
//! header and filename hints first, then falls back to sniffing the first
//! bytes of the body. JSON sniffing runs before ZIP sniffing, and each
//! request is classified exactly once.

/// Sniffed format of an upload body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Json,
    Zip,
    Raw,
}

/// Local-file, end-of-central-directory, and spanned-archive signatures.
const ZIP_MAGICS: [&[u8; 4]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

/// Bytes of the body inspected by the sniffing fallback.
const SNIFF_WINDOW: usize = 64;

/// Classify an upload body.
///
/// `filename` is the resolved filename hint (content-disposition, multipart
/// field, or `filename` query parameter); `head` is the start of the body.
pub fn classify(content_type: Option<&str>, filename: Option<&str>, head: &[u8]) -> UploadFormat {
    let content_type = content_type.map(str::to_ascii_lowercase);
    let filename = filename.map(str::to_ascii_lowercase);

    if let Some(ct) = &content_type {
        if ct.contains("application/json") {
            return UploadFormat::Json;
        }
    }

    // Metadata bodies are named `<run>_metadata.json` by current firmware,
    // but older controllers reuse the archive filename; the marker alone
    // decides.
    if let Some(name) = &filename {
        if name.contains("metadata") {
            return UploadFormat::Json;
        }
        if name.ends_with(".zip") {
            return UploadFormat::Zip;
        }
    }

    if let Some(ct) = &content_type {
        if ct.contains("application/zip") {
            return UploadFormat::Zip;
        }
    }

    if sniffs_as_json(head) {
        return UploadFormat::Json;
    }

    if sniffs_as_zip(head) {
        return UploadFormat::Zip;
    }

    UploadFormat::Raw
}

fn sniffs_as_json(head: &[u8]) -> bool {
    head.iter()
        .take(SNIFF_WINDOW)
        .find(|b| !b.is_ascii_whitespace())
        .map(|b| *b == b'{' || *b == b'[')
        .unwrap_or(false)
}

fn sniffs_as_zip(head: &[u8]) -> bool {
    head.len() >= 4 && ZIP_MAGICS.iter().any(|magic| &head[..4] == *magic)
}
