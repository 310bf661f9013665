// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: firmware  —  immutable firmware image
//
//  `.hex` / `.ihex` files are decoded from Intel HEX into a flat image that
//  starts at the lowest address seen (gaps are padded with 0xFF, the erased
//  flash value).  Images spanning more than `MAX_HEX_SPAN` are refused.
//  Anything else is taken byte-for-byte.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{FlashError, Result};

/// Loaded once per batch and shared read-only by every session.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    path:      PathBuf,
    data:      Arc<[u8]>,
    base_addr: u32,
}

impl FirmwareImage {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| FlashError::FirmwareUnreadable {
            path: path.display().to_string(),
            source,
        })?;

        let is_hex = matches!(
            path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
            Some("hex") | Some("ihex")
        );

        if is_hex {
            let text = String::from_utf8_lossy(&raw);
            let (base_addr, data) = decode_ihex(path, &text)?;
            log::debug!("decoded {} ({} bytes @ {:#010x})", path.display(), data.len(), base_addr);
            Ok(Self { path: path.to_owned(), data: data.into(), base_addr })
        } else {
            Ok(Self::from_bytes(path, raw))
        }
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self { path: path.into(), data: bytes.into(), base_addr: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Load address of the first byte (non-zero only for Intel HEX input).
    pub fn base_addr(&self) -> u32 {
        self.base_addr
    }

    pub fn sha256(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(&self.data[..]));
        out
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256())
    }

    /// `hash * 33 + byte`, seeded with 5381.  Zero for an empty image.
    pub fn djb2(&self) -> u32 {
        djb2(&self.data)
    }
}

pub fn djb2(data: &[u8]) -> u32 {
    if data.is_empty() {
        return 0;
    }
    data.iter()
        .fold(5381u32, |h, &b| h.wrapping_shl(5).wrapping_add(h).wrapping_add(b as u32))
}

// ─────────────────────────────────────────────────────────────────────────────
//  Intel HEX
// ─────────────────────────────────────────────────────────────────────────────

/// Largest address range a decoded HEX image may cover.
pub const MAX_HEX_SPAN: u32 = 16 * 1024 * 1024;

fn decode_ihex(path: &Path, text: &str) -> Result<(u32, Vec<u8>)> {
    use ihex::Record::*;

    let mut segments: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut upper: u32 = 0;

    for record in ihex::Reader::new(text) {
        let record = record.map_err(|source| FlashError::InvalidHex {
            path: path.display().to_string(),
            source,
        })?;
        match record {
            Data { offset, value } => {
                if !value.is_empty() {
                    segments.push((upper.wrapping_add(offset as u32), value));
                }
            }
            ExtendedSegmentAddress(segment) => upper = (segment as u32) << 4,
            ExtendedLinearAddress(high) => upper = (high as u32) << 16,
            EndOfFile | StartSegmentAddress { .. } | StartLinearAddress(_) => (),
        }
    }

    let first = match segments.iter().map(|(addr, _)| *addr).min() {
        Some(addr) => addr,
        None => return Ok((0, Vec::new())),
    };
    let last = segments
        .iter()
        .map(|(addr, data)| addr.saturating_add(data.len() as u32 - 1))
        .max()
        .unwrap_or(first);

    if last - first >= MAX_HEX_SPAN {
        return Err(FlashError::SparseHex {
            path: path.display().to_string(),
            first,
            last,
            limit: MAX_HEX_SPAN,
        });
    }

    let mut image = vec![0xFFu8; (last - first) as usize + 1];
    for (addr, data) in segments {
        let at  = (addr - first) as usize;
        let end = (at + data.len()).min(image.len());
        image[at..end].copy_from_slice(&data[..end - at]);
    }
    Ok((first, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(text: &str) -> Result<(u32, Vec<u8>)> {
        decode_ihex(Path::new("fw.hex"), text)
    }

    #[test]
    fn decodes_hex_with_gap() {
        let text = "\
:0400000001020304F2
:02000800AABB91
:00000001FF
";
        let (base, data) = decode(text).unwrap();
        assert_eq!(base, 0);
        assert_eq!(data, vec![1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF, 0xAA, 0xBB]);
    }

    #[test]
    fn extended_linear_address_sets_base() {
        let text = "\
:020000040800F2
:0200000011EEFF
:00000001FF
";
        let (base, data) = decode(text).unwrap();
        assert_eq!(base, 0x0800_0000);
        assert_eq!(data, vec![0x11, 0xEE]);
    }

    #[test]
    fn rejects_bad_checksum() {
        let err = decode(":0400000001020304F3\n").unwrap_err();
        assert!(matches!(err, FlashError::InvalidHex { .. }));
    }

    #[test]
    fn rejects_flash_plus_option_bytes_span() {
        // flash at 0x0800_0000, option bytes at 0x1FFF_C000
        let text = "\
:020000040800F2
:0200000011EEFF
:020000041FFFDC
:04C00000AAF855073E
:00000001FF
";
        match decode(text).unwrap_err() {
            FlashError::SparseHex { first, last, limit, .. } => {
                assert_eq!(first, 0x0800_0000);
                assert_eq!(last, 0x1FFF_C003);
                assert_eq!(limit, MAX_HEX_SPAN);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sparse_hex_file_is_refused_on_load() {
        let path = std::env::temp_dir().join(format!("pad-flasher-sparse-{}.hex", std::process::id()));
        std::fs::write(&path, ":020000040800F2\n:0200000011EEFF\n:020000041FFFDC\n:04C00000AAF855073E\n:00000001FF\n").unwrap();
        let err = FirmwareImage::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, FlashError::SparseHex { .. }));
    }

    #[test]
    fn djb2_matches_reference() {
        assert_eq!(djb2(b""), 0);
        // 5381 * 33 + 'a'
        assert_eq!(djb2(b"a"), 177_670);
    }

    #[test]
    fn raw_image_is_shared() {
        let img = FirmwareImage::from_bytes("fw.bin", vec![0u8; 1024]);
        let other = img.clone();
        assert_eq!(img.len(), 1024);
        assert!(std::ptr::eq(img.bytes().as_ptr(), other.bytes().as_ptr()));
        assert_eq!(img.sha256_hex().len(), 64);
    }

    #[test]
    fn missing_file_is_a_precondition_error() {
        let err = FirmwareImage::load("/nonexistent/pad-flasher/fw.bin").unwrap_err();
        assert!(matches!(err, FlashError::FirmwareUnreadable { .. }));
    }
}
