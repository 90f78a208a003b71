//! Read-only access to the entries of an e-book archive

use crate::ParseError;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

/// Upper bound for any single entry read into memory
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Upper bound for container and package documents
pub const MAX_DOCUMENT_BYTES: u64 = 4 * 1024 * 1024;

/// An opened ZIP-family container
///
/// Generic over the reader so tests can work on in-memory buffers.
#[derive(Debug)]
pub struct Archive<R = File> {
    zip: ZipArchive<R>,
}

impl Archive<File> {
    /// Open an archive on disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> Archive<R> {
    /// Wrap any seekable reader holding ZIP data
    pub fn from_reader(reader: R) -> Result<Self, ParseError> {
        let zip = ZipArchive::new(reader).map_err(|e| ParseError::NotAnArchive(e.to_string()))?;
        Ok(Self { zip })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.zip.len()
    }

    /// Whether the archive has no entries at all
    pub fn is_empty(&self) -> bool {
        self.zip.len() == 0
    }

    /// Whether an entry with this name exists
    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_entry_name(name);
        self.zip.file_names().any(|n| n == name)
    }

    /// Read an entry into memory, up to [`MAX_ENTRY_BYTES`]
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, ParseError> {
        self.read_limited(name, MAX_ENTRY_BYTES)
    }

    /// Read an XML document entry, up to [`MAX_DOCUMENT_BYTES`]
    pub fn read_document(&mut self, name: &str) -> Result<Vec<u8>, ParseError> {
        self.read_limited(name, MAX_DOCUMENT_BYTES)
    }

    /// Read an entry, failing with [`ParseError::CorruptEntry`] once it
    /// inflates past `limit` bytes
    ///
    /// The size recorded in the archive header is not trusted.
    pub fn read_limited(&mut self, name: &str, limit: u64) -> Result<Vec<u8>, ParseError> {
        let name = normalize_entry_name(name);
        let mut entry = self.zip.by_name(name).map_err(|e| match e {
            ZipError::FileNotFound => ParseError::EntryNotFound(name.to_string()),
            other => ParseError::CorruptEntry {
                entry: name.to_string(),
                message: other.to_string(),
            },
        })?;

        let mut buffer = Vec::new();
        entry
            .by_ref()
            .take(limit.saturating_add(1))
            .read_to_end(&mut buffer)
            .map_err(|e| ParseError::CorruptEntry {
                entry: name.to_string(),
                message: e.to_string(),
            })?;

        if buffer.len() as u64 > limit {
            return Err(ParseError::CorruptEntry {
                entry: name.to_string(),
                message: format!("entry exceeds {} bytes", limit),
            });
        }
        Ok(buffer)
    }

    /// Read an XML document entry as text
    pub fn read_to_string(&mut self, name: &str) -> Result<String, ParseError> {
        let bytes = self.read_document(name)?;
        decode_text(bytes).map_err(|message| ParseError::CorruptEntry {
            entry: normalize_entry_name(name).to_string(),
            message,
        })
    }
}

/// Decode document bytes as text
///
/// UTF-16 is recognised by its byte order mark; anything else must be
/// UTF-8. A leading byte order mark is dropped either way.
pub(crate) fn decode_text(bytes: Vec<u8>) -> Result<String, String> {
    let text = if let Some(rest) = bytes.strip_prefix(&[0xfe_u8, 0xff]) {
        decode_utf16(rest, u16::from_be_bytes)?
    } else if let Some(rest) = bytes.strip_prefix(&[0xff_u8, 0xfe]) {
        decode_utf16(rest, u16::from_le_bytes)?
    } else {
        String::from_utf8(bytes).map_err(|e| e.to_string())?
    };
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, String> {
    if bytes.len() % 2 != 0 {
        return Err("odd number of bytes in UTF-16 text".to_string());
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| e.to_string())
}

/// Entry names are stored without a leading slash
fn normalize_entry_name(name: &str) -> &str {
    name.trim_start_matches('/')
}
