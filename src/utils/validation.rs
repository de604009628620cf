use crate::api::error::UploadError;
use crate::models::ValidationResult;
use std::path::Path;
use std::sync::LazyLock;
use tokio::io::AsyncReadExt;

/// A byte signature: fixed byte runs at fixed offsets from the start of the file.
/// Positions not covered by any run are wildcards.
#[derive(Debug, Clone, Copy)]
pub struct MagicSignature {
    pub segments: &'static [(usize, &'static [u8])],
    pub mime_type: &'static str,
    pub extension: &'static str,
}

impl MagicSignature {
    /// Number of bytes the header must hold for this signature to be checked
    pub fn span(&self) -> usize {
        self.segments
            .iter()
            .map(|(offset, bytes)| offset + bytes.len())
            .max()
            .unwrap_or(0)
    }

    /// Number of fixed (non-wildcard) bytes, used as the specificity rank
    pub fn fixed_len(&self) -> usize {
        self.segments.iter().map(|(_, bytes)| bytes.len()).sum()
    }

    pub fn matches(&self, header: &[u8]) -> bool {
        header.len() >= self.span()
            && self
                .segments
                .iter()
                .all(|(offset, bytes)| &header[*offset..offset + bytes.len()] == *bytes)
    }
}

const SIGNATURES: &[MagicSignature] = &[
    // JPEG: SOI marker followed by the first segment marker
    MagicSignature { segments: &[(0, &[0xFF, 0xD8, 0xFF, 0xE0])], mime_type: "image/jpeg", extension: "jpg" }, // JFIF
    MagicSignature { segments: &[(0, &[0xFF, 0xD8, 0xFF, 0xE1])], mime_type: "image/jpeg", extension: "jpg" }, // Exif
    MagicSignature { segments: &[(0, &[0xFF, 0xD8, 0xFF, 0xE2])], mime_type: "image/jpeg", extension: "jpg" }, // ICC
    MagicSignature { segments: &[(0, &[0xFF, 0xD8, 0xFF, 0xE8])], mime_type: "image/jpeg", extension: "jpg" }, // SPIFF
    MagicSignature { segments: &[(0, &[0xFF, 0xD8, 0xFF, 0xDB])], mime_type: "image/jpeg", extension: "jpg" }, // raw
    MagicSignature { segments: &[(0, &[0xFF, 0xD8, 0xFF, 0xEE])], mime_type: "image/jpeg", extension: "jpg" }, // Adobe
    // PNG
    MagicSignature { segments: &[(0, &[0x89, 0x50, 0x4E, 0x47])], mime_type: "image/png", extension: "png" },
    MagicSignature {
        segments: &[(0, &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])],
        mime_type: "image/png",
        extension: "png",
    },
    // GIF
    MagicSignature { segments: &[(0, b"GIF87a")], mime_type: "image/gif", extension: "gif" },
    MagicSignature { segments: &[(0, b"GIF89a")], mime_type: "image/gif", extension: "gif" },
    // WEBP: RIFF container, 4-byte length, WEBP form type
    MagicSignature { segments: &[(0, b"RIFF"), (8, b"WEBP")], mime_type: "image/webp", extension: "webp" },
];

/// Ordered signature table. Entries are kept sorted by specificity, most fixed
/// bytes first, so a longer signature always wins over a shorter overlapping one.
#[derive(Debug, Clone)]
pub struct SignatureTable {
    entries: Vec<MagicSignature>,
    header_len: usize,
}

impl SignatureTable {
    pub fn new(mut entries: Vec<MagicSignature>) -> Self {
        // stable: equally specific entries keep their declared order
        entries.sort_by(|a, b| b.fixed_len().cmp(&a.fixed_len()));
        let header_len = entries.iter().map(MagicSignature::span).max().unwrap_or(0);
        Self { entries, header_len }
    }

    pub fn entries(&self) -> &[MagicSignature] {
        &self.entries
    }

    /// Bytes to read from the start of a file to evaluate every entry
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// First entry in table order matching the header
    pub fn detect(&self, header: &[u8]) -> Option<&MagicSignature> {
        self.entries.iter().find(|sig| sig.matches(header))
    }

    /// Classifies an already-read header against the accepted MIME types
    pub fn classify(&self, header: &[u8], accepted: &[String]) -> ValidationResult {
        match self.detect(header) {
            Some(sig) if accepted.iter().any(|m| m == sig.mime_type) => ValidationResult {
                valid: true,
                detected_mime_type: Some(sig.mime_type),
                detected_extension: Some(sig.extension),
                error: None,
            },
            Some(sig) => ValidationResult {
                valid: false,
                detected_mime_type: Some(sig.mime_type),
                detected_extension: Some(sig.extension),
                error: Some(
                    UploadError::TypeMismatch {
                        detected: sig.mime_type.to_string(),
                        expected: accepted.join(", "),
                    }
                    .to_string(),
                ),
            },
            None => ValidationResult {
                valid: false,
                detected_mime_type: None,
                detected_extension: None,
                error: Some(UploadError::UnrecognizedFormat.to_string()),
            },
        }
    }

    /// Reads the file prefix and classifies it. Read failures produce an
    /// invalid result rather than an error so callers can still clean up.
    pub async fn identify(&self, path: &Path, accepted: &[String]) -> ValidationResult {
        match read_header(path, self.header_len).await {
            Ok(header) => self.classify(&header, accepted),
            Err(e) => {
                tracing::error!("Magic number read failed for {}: {}", path.display(), e);
                ValidationResult {
                    valid: false,
                    detected_mime_type: None,
                    detected_extension: None,
                    error: Some("File validation failed".to_string()),
                }
            }
        }
    }
}

/// Process-wide signature table for the supported image formats
pub static DEFAULT_SIGNATURES: LazyLock<SignatureTable> =
    LazyLock::new(|| SignatureTable::new(SIGNATURES.to_vec()));

/// Reads up to `len` bytes from the start of a file; shorter files yield a shorter header
async fn read_header(path: &Path, len: usize) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut header).await?;
    Ok(header)
}

/// Validates a byte count against the maximum limit. `size == max_size` is accepted.
pub fn check_size(size: u64, max_size: u64) -> Result<(), UploadError> {
    if size > max_size {
        return Err(UploadError::SizeExceeded { limit: max_size });
    }
    Ok(())
}

/// Sanitizes a client filename for display. The result never touches the
/// filesystem; stored names are generated server-side.
pub fn sanitize_filename(filename: &str) -> String {
    // Keep only the last path component, whichever separator the client used
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';') {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        "unnamed".to_string()
    } else {
        sanitized
    }
}
