//! Firmware image handling.
//!
//! The bootloader takes a flat binary written to consecutive addresses in
//! pieces of at most [`MAX_CHUNK_LEN`] bytes. This module also carries the
//! two offline helpers used when preparing images: padding a binary to a
//! fixed size and rendering it as a C array.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::MAX_CHUNK_LEN;

/// Default fill byte for padding (erased flash).
pub const DEFAULT_FILL: u8 = 0xFF;

/// A flat firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    data: Vec<u8>,
}

impl Firmware {
    /// Load an image from a binary file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());

        let mut reader = BufReader::new(File::open(path)?);
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        Self::from_bytes(data)
    }

    /// Wrap raw image bytes.
    ///
    /// Fails for an empty image and for one whose size does not fit the
    /// 4-byte length field of the protocol.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidImage("image is empty".into()));
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::InvalidImage(format!(
                "image of {} bytes exceeds the 32-bit length field",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a constructed image.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Image size as sent in the length announcement.
    #[allow(clippy::cast_possible_truncation)]
    pub fn len_u32(&self) -> u32 {
        // Checked on construction
        self.data.len() as u32
    }

    /// Split the image into write units starting at `start_address`.
    pub fn chunks(&self, start_address: u32) -> Result<Chunks<'_>> {
        chunks(&self.data, start_address)
    }
}

impl AsRef<[u8]> for Firmware {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// One memory write unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Target address of the first byte.
    pub address: u32,
    /// Bytes to write, at most [`MAX_CHUNK_LEN`].
    pub data: &'a [u8],
}

/// Iterator over the write units of an image.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    inner: std::slice::Chunks<'a, u8>,
    next_address: Option<u32>,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    #[allow(clippy::cast_possible_truncation)]
    fn next(&mut self) -> Option<Self::Item> {
        let data = self.inner.next()?;
        let address = self.next_address?;
        // None only once the image ends exactly at the top of the address space
        self.next_address = address.checked_add(data.len() as u32);
        Some(Chunk { address, data })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Split `data` into write units starting at `start_address`.
///
/// Fails when the image would run past the 32-bit address space.
pub fn chunks(data: &[u8], start_address: u32) -> Result<Chunks<'_>> {
    let end = u64::from(start_address) + data.len() as u64;
    if end > 1 << 32 {
        return Err(Error::InvalidImage(format!(
            "{} bytes at 0x{start_address:08X} run past the 32-bit address space",
            data.len()
        )));
    }
    Ok(Chunks {
        inner: data.chunks(MAX_CHUNK_LEN),
        next_address: Some(start_address),
    })
}

/// Pad `data` with `fill` up to exactly `size` bytes.
pub fn pad_image(data: &[u8], size: usize, fill: u8) -> Result<Vec<u8>> {
    if data.len() > size {
        return Err(Error::InvalidImage(format!(
            "image is {} bytes, larger than the {size} byte target",
            data.len()
        )));
    }
    let mut padded = Vec::with_capacity(size);
    padded.extend_from_slice(data);
    padded.resize(size, fill);
    Ok(padded)
}

/// Render `data` as a C byte array named `name`.
pub fn to_c_array(data: &[u8], name: &str) -> String {
    let mut out = String::with_capacity(data.len() * 6 + name.len() + 32);
    let _ = writeln!(out, "static const uint8_t {name}[] = {{");
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "0x{byte:02X}");
    }
    out.push_str("};");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_chunks_split_at_251_bytes() {
        let image = Firmware::from_bytes(vec![0xA5; 600]).unwrap();
        let chunks: Vec<(u32, usize)> = image
            .chunks(0x8000)
            .unwrap()
            .map(|c| (c.address, c.data.len()))
            .collect();
        assert_eq!(chunks, vec![(0x8000, 251), (0x80FB, 251), (0x81F6, 98)]);
    }

    #[test]
    fn test_chunks_exact_multiple() {
        let data = vec![0u8; MAX_CHUNK_LEN * 2];
        let iter = chunks(&data, 0).unwrap();
        assert_eq!(iter.len(), 2);
        let last = iter.last().unwrap();
        assert_eq!(last.address, 251);
        assert_eq!(last.data.len(), 251);
    }

    #[test]
    fn test_chunks_cover_image_in_order() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let joined: Vec<u8> = chunks(&data, 0x8000)
            .unwrap()
            .flat_map(|c| c.data.iter().copied())
            .collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_chunks_past_address_space_rejected() {
        assert!(matches!(
            chunks(&[0u8; 600], 0xFFFF_FF00),
            Err(Error::InvalidImage(_))
        ));
        assert!(matches!(
            chunks(&[0u8; 1], u32::MAX).map(|c| c.count()),
            Ok(1)
        ));
    }

    #[test]
    fn test_chunks_ending_at_top_of_address_space() {
        let data = vec![0u8; 0x100];
        let addresses: Vec<u32> = chunks(&data, 0xFFFF_FF00)
            .unwrap()
            .map(|c| c.address)
            .collect();
        assert_eq!(addresses, vec![0xFFFF_FF00, 0xFFFF_FFFB]);
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            Firmware::from_bytes(Vec::new()),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5]).unwrap();
        let image = Firmware::from_file(file.path()).unwrap();
        assert_eq!(image.data(), &[1, 2, 3, 4, 5]);
        assert_eq!(image.len_u32(), 5);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Firmware::from_file(dir.path().join("missing.bin")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_pad_image() {
        let padded = pad_image(&[1, 2, 3], 6, DEFAULT_FILL).unwrap();
        assert_eq!(padded, vec![1, 2, 3, 0xFF, 0xFF, 0xFF]);
        assert_eq!(pad_image(&[1, 2], 2, 0x00).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_pad_image_too_large() {
        assert!(matches!(
            pad_image(&[0; 10], 8, DEFAULT_FILL),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_to_c_array() {
        assert_eq!(
            to_c_array(&[0x00, 0xAB, 0x7F], "data"),
            "static const uint8_t data[] = {\n0x00, 0xAB, 0x7F};"
        );
        assert_eq!(to_c_array(&[], "empty"), "static const uint8_t empty[] = {\n};");
    }
}
