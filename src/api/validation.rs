//! Upload checks run before anything touches disk.

/// Content types accepted by the upload endpoint.
pub const ALLOWED_MIME_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg"];

const PDF_MAGIC: &[u8] = b"%PDF";
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];

/// Why an uploaded file was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnsupportedType(String),
    ContentMismatch,
    Empty,
    TooLarge { size: usize, max: usize },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType(mime) => write!(f, "unsupported content type '{mime}'"),
            Self::ContentMismatch => f.write_str("file content does not match its content type"),
            Self::Empty => f.write_str("file is empty"),
            Self::TooLarge { size, max } => write!(f, "file is {size} bytes, limit is {max}"),
        }
    }
}

/// Normalize a declared content type (`image/jpg`, parameters, case).
pub fn normalize_mime(declared: &str) -> String {
    let base = declared.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => base,
    }
}

/// Check the declared type against the allowed set and the leading bytes.
pub fn validate_upload(mime: &str, bytes: &[u8], max_bytes: usize) -> Result<(), Rejection> {
    if !ALLOWED_MIME_TYPES.contains(&mime) {
        return Err(Rejection::UnsupportedType(mime.to_string()));
    }
    if bytes.is_empty() {
        return Err(Rejection::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(Rejection::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    let magic = match mime {
        "application/pdf" => PDF_MAGIC,
        "image/png" => PNG_MAGIC,
        _ => JPEG_MAGIC,
    };
    if !bytes.starts_with(magic) {
        return Err(Rejection::ContentMismatch);
    }
    Ok(())
}
