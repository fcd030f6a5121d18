//! Content classification by magic-byte prefix.

use bytes::Bytes;
use std::fmt;

/// Every signature is compared against at least this many leading bytes;
/// anything shorter is `Unknown`.
pub const SNIFF_LEN: usize = 4;

/// Formats recognised in uploaded blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Png,
    Jpeg,
    Pdf,
    Zip,
    Unknown,
}

const SIGNATURES: &[(FileType, &[u8])] = &[
    (FileType::Png, &[0x89, 0x50, 0x4E, 0x47]),
    (FileType::Jpeg, &[0xFF, 0xD8, 0xFF]),
    (FileType::Pdf, &[0x25, 0x50, 0x44, 0x46]),
    (FileType::Zip, &[0x50, 0x4B, 0x03, 0x04]),
];

impl FileType {
    /// Classifies a completed byte sequence.
    ///
    /// # Example
    ///
    /// ```
    /// # use dropcast::relay::sniff::FileType;
    /// assert_eq!(FileType::classify(b"%PDF-1.7"), FileType::Pdf);
    /// assert_eq!(FileType::classify(&[0xFF, 0xD8]), FileType::Unknown);
    /// ```
    pub fn classify(bytes: &[u8]) -> Self {
        if bytes.len() < SNIFF_LEN {
            return FileType::Unknown;
        }

        SIGNATURES
            .iter()
            .find(|(_, prefix)| bytes.len() >= prefix.len() && bytes.starts_with(prefix))
            .map(|(kind, _)| *kind)
            .unwrap_or(FileType::Unknown)
    }

    /// File extension without the leading dot, `"unknown"` when unrecognised.
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Png => "png",
            FileType::Jpeg => "jpg",
            FileType::Pdf => "pdf",
            FileType::Zip => "zip",
            FileType::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != FileType::Unknown
    }

    /// Reverse of [`extension`](Self::extension), used for stored file names.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" => FileType::Png,
            "jpg" | "jpeg" => FileType::Jpeg,
            "pdf" => FileType::Pdf,
            "zip" => FileType::Zip,
            _ => FileType::Unknown,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FileType::Png => "image/png",
            FileType::Jpeg => "image/jpeg",
            FileType::Pdf => "application/pdf",
            FileType::Zip => "application/zip",
            FileType::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One completed upload and what it was classified as.
#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Bytes,
    pub kind: FileType,
}

impl Blob {
    pub fn new(data: Bytes) -> Self {
        let kind = FileType::classify(&data);
        Self { data, kind }
    }

    pub fn extension(&self) -> &'static str {
        self.kind.extension()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
