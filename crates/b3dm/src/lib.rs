//! B3DM: batched 3D model tile container.
//!
//! - Wraps one opaque geometry payload (normally binary glTF) with two JSON tables.
//! - Feature table: `{"batchLength": N}`.
//! - Batch table: `{"batchId": ["0", .., "N-1"], "fileName": [display names]}`.
//! - Binary table sections are never written; their header lengths are always 0.
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"b3dm"
//!   04  : u32     version = 1
//!   08  : u32     byte_length (whole file)
//!   0C  : u32     feature_table_json_byte_length
//!   10  : u32     feature_table_binary_byte_length (0)
//!   14  : u32     batch_table_json_byte_length
//!   18  : u32     batch_table_binary_byte_length (0)
//!   1C  : feature table JSON (UTF-8)
//!   ..  : batch table JSON (UTF-8)
//!   ..  : payload bytes, verbatim
//!
//! JSON blocks are unpadded unless [`Alignment::Boundary`] is requested.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

pub const B3DM_MAGIC: [u8; 4] = *b"b3dm";
pub const B3DM_VERSION: u32 = 1;
pub const B3DM_HEADER_LEN: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureTable {
    pub batch_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTable {
    pub batch_id: Vec<String>,
    pub file_name: Vec<String>,
}

impl BatchTable {
    /// One entry per display name, with ids `"0"..="N-1"` in order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            batch_id: (0..names.len()).map(|i| i.to_string()).collect(),
            file_name: names.iter().map(|n| n.as_ref().to_owned()).collect(),
        }
    }
}

/// How the JSON blocks are laid out after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    /// As-built layout: JSON written exactly as serialized.
    #[default]
    Unpadded,
    /// Pad each JSON block with spaces so its end offset is a multiple of the boundary.
    Boundary(usize),
}

/// The seven header fields, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct B3dmHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub byte_length: u32,
    pub feature_table_json_len: u32,
    pub feature_table_bin_len: u32,
    pub batch_table_json_len: u32,
    pub batch_table_bin_len: u32,
}

impl B3dmHeader {
    /// Payload length implied by the header fields, or `None` if they do not add up.
    pub fn payload_len(&self) -> Option<usize> {
        (self.byte_length as usize)
            .checked_sub(B3DM_HEADER_LEN)?
            .checked_sub(self.feature_table_json_len as usize)?
            .checked_sub(self.feature_table_bin_len as usize)?
            .checked_sub(self.batch_table_json_len as usize)?
            .checked_sub(self.batch_table_bin_len as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct B3dmTile {
    pub feature_table_json: String,
    pub batch_table_json: String,
    pub payload: Vec<u8>,
}

impl B3dmTile {
    /// Build the feature and batch tables for an ordered list of display names.
    pub fn from_names<S: AsRef<str>>(names: &[S], payload: Vec<u8>) -> io::Result<Self> {
        let feature_table = FeatureTable {
            batch_length: names.len(),
        };

        Ok(Self {
            feature_table_json: serde_json::to_string(&feature_table)?,
            batch_table_json: serde_json::to_string(&BatchTable::from_names(names))?,
            payload,
        })
    }

    pub fn aligned(mut self, alignment: Alignment) -> Self {
        if let Alignment::Boundary(boundary) = alignment {
            pad_to_boundary(&mut self.feature_table_json, B3DM_HEADER_LEN, boundary);
            let offset = B3DM_HEADER_LEN + self.feature_table_json.len();
            pad_to_boundary(&mut self.batch_table_json, offset, boundary);
        }
        self
    }

    pub fn header(&self) -> io::Result<B3dmHeader> {
        let total = B3DM_HEADER_LEN
            + self.feature_table_json.len()
            + self.batch_table_json.len()
            + self.payload.len();

        Ok(B3dmHeader {
            magic: B3DM_MAGIC,
            version: B3DM_VERSION,
            byte_length: to_u32(total)?,
            feature_table_json_len: to_u32(self.feature_table_json.len())?,
            feature_table_bin_len: 0,
            batch_table_json_len: to_u32(self.batch_table_json.len())?,
            batch_table_bin_len: 0,
        })
    }

    pub fn feature_table(&self) -> io::Result<FeatureTable> {
        Ok(serde_json::from_str(&self.feature_table_json)?)
    }

    pub fn batch_table(&self) -> io::Result<BatchTable> {
        Ok(serde_json::from_str(&self.batch_table_json)?)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let header = self.header()?;

        w.write_all(&header.magic)?;
        write_u32(w, header.version)?;
        write_u32(w, header.byte_length)?;
        write_u32(w, header.feature_table_json_len)?;
        write_u32(w, header.feature_table_bin_len)?;
        write_u32(w, header.batch_table_json_len)?;
        write_u32(w, header.batch_table_bin_len)?;

        w.write_all(self.feature_table_json.as_bytes())?;
        w.write_all(self.batch_table_json.as_bytes())?;
        w.write_all(&self.payload)?;

        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(
            B3DM_HEADER_LEN
                + self.feature_table_json.len()
                + self.batch_table_json.len()
                + self.payload.len(),
        );
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Append spaces so that `offset + text.len()` lands on a multiple of `boundary`.
pub fn pad_to_boundary(text: &mut String, offset: usize, boundary: usize) {
    if boundary == 0 {
        return;
    }

    let rem = (offset + text.len()) % boundary;
    if rem != 0 {
        text.extend(std::iter::repeat(' ').take(boundary - rem));
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated b3dm"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

fn to_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| bad("b3dm section exceeds u32 range"))
}

fn utf8_block(raw: &[u8], what: &str) -> io::Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|_| bad(&format!("{} is not valid UTF-8", what)))
}

/// Read only the fixed header.
pub fn parse_header(mut p: &[u8]) -> io::Result<B3dmHeader> {
    let magic_raw = take(&mut p, 4)?;
    let mut magic = [0u8; 4];
    magic.copy_from_slice(magic_raw);

    Ok(B3dmHeader {
        magic,
        version: le_u32(&mut p)?,
        byte_length: le_u32(&mut p)?,
        feature_table_json_len: le_u32(&mut p)?,
        feature_table_bin_len: le_u32(&mut p)?,
        batch_table_json_len: le_u32(&mut p)?,
        batch_table_bin_len: le_u32(&mut p)?,
    })
}

/// Parse a tile from a contiguous byte slice. This is the single source of truth for parsing.
pub fn parse_b3dm_bytes(bytes: &[u8]) -> io::Result<B3dmTile> {
    let header = parse_header(bytes)?;

    if header.magic != B3DM_MAGIC {
        return Err(bad("bad b3dm magic"));
    }

    if header.version != B3DM_VERSION {
        return Err(bad("unsupported b3dm version"));
    }

    if header.byte_length as usize != bytes.len() {
        return Err(bad(&format!(
            "byte_length {} does not match stream length {}",
            header.byte_length,
            bytes.len()
        )));
    }

    let payload_len = header
        .payload_len()
        .ok_or_else(|| bad("section lengths exceed byte_length"))?;

    let mut p = &bytes[B3DM_HEADER_LEN..];

    let feature_table_json = utf8_block(
        take(&mut p, header.feature_table_json_len as usize)?,
        "feature table JSON",
    )?;
    take(&mut p, header.feature_table_bin_len as usize)?;

    let batch_table_json = utf8_block(
        take(&mut p, header.batch_table_json_len as usize)?,
        "batch table JSON",
    )?;
    take(&mut p, header.batch_table_bin_len as usize)?;

    let payload = take(&mut p, payload_len)?.to_vec();

    Ok(B3dmTile {
        feature_table_json,
        batch_table_json,
        payload,
    })
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<B3dmTile> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_b3dm_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<B3dmTile> {
    let bytes = std::fs::read(path)?;
    parse_b3dm_bytes(&bytes)
}

pub fn write_file<P: AsRef<Path>>(path: P, tile: &B3dmTile) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    tile.write_to(&mut file)?;
    file.flush()?;
    Ok(())
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("building-{i}")).collect()
    }

    #[test]
    fn tables_follow_batch_order() {
        let tile = B3dmTile::from_names(&["a", "b", "c"], vec![1, 2, 3]).unwrap();

        assert_eq!(tile.feature_table_json, r#"{"batchLength":3}"#);
        assert_eq!(
            tile.batch_table_json,
            r#"{"batchId":["0","1","2"],"fileName":["a","b","c"]}"#
        );
    }

    #[test]
    fn header_lengths_reconcile() {
        let payload = vec![0xAB; 37];
        let tile = B3dmTile::from_names(&names(4), payload.clone()).unwrap();
        let header = tile.header().unwrap();
        let bytes = tile.to_bytes().unwrap();

        assert_eq!(&bytes[0..4], b"b3dm");
        assert_eq!(header.byte_length as usize, bytes.len());
        assert_eq!(
            header.byte_length as usize,
            28 + tile.feature_table_json.len() + tile.batch_table_json.len() + payload.len()
        );
        assert_eq!(header.feature_table_bin_len, 0);
        assert_eq!(header.batch_table_bin_len, 0);
        assert_eq!(parse_header(&bytes).unwrap(), header);
    }

    #[test]
    fn payload_survives_round_trip() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let tile = B3dmTile::from_names(&names(2), payload.clone()).unwrap();

        let decoded = parse_b3dm_bytes(&tile.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded, tile);
        assert_eq!(decoded.feature_table().unwrap().batch_length, 2);
        assert_eq!(decoded.batch_table().unwrap().file_name, names(2));
    }

    #[test]
    fn unicode_names_are_measured_in_bytes() {
        let tile = B3dmTile::from_names(&["건물", "Straße"], vec![9; 5]).unwrap();
        let bytes = tile.to_bytes().unwrap();

        let decoded = parse_b3dm_bytes(&bytes).unwrap();
        assert_eq!(decoded.batch_table().unwrap().file_name, vec!["건물", "Straße"]);
        assert_eq!(decoded.payload, vec![9; 5]);
    }

    #[test]
    fn rejects_length_mismatch() {
        let tile = B3dmTile::from_names(&names(1), vec![7; 16]).unwrap();
        let mut bytes = tile.to_bytes().unwrap();

        bytes.push(0);
        let err = parse_b3dm_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        bytes.truncate(bytes.len() - 2);
        assert!(parse_b3dm_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_section_overflow() {
        let tile = B3dmTile::from_names(&names(1), vec![7; 4]).unwrap();
        let mut bytes = tile.to_bytes().unwrap();

        // Claim a feature table longer than the whole file.
        bytes[12..16].copy_from_slice(&10_000u32.to_le_bytes());
        let err = parse_b3dm_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let tile = B3dmTile::from_names(&names(1), vec![1]).unwrap();
        let good = tile.to_bytes().unwrap();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'x';
        assert!(parse_b3dm_bytes(&bad_magic).is_err());

        let mut bad_version = good;
        bad_version[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(parse_b3dm_bytes(&bad_version).is_err());
    }

    #[test]
    fn truncated_header_is_eof() {
        let err = parse_b3dm_bytes(b"b3dm\x01\x00").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn boundary_alignment_is_opt_in() {
        let unpadded = B3dmTile::from_names(&names(3), vec![5; 10]).unwrap();
        let padded = unpadded.clone().aligned(Alignment::Boundary(8));

        assert_eq!(unpadded.clone().aligned(Alignment::Unpadded), unpadded);
        assert_eq!((28 + padded.feature_table_json.len()) % 8, 0);
        assert_eq!(
            (28 + padded.feature_table_json.len() + padded.batch_table_json.len()) % 8,
            0
        );

        let decoded = parse_b3dm_bytes(&padded.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.feature_table().unwrap().batch_length, 3);
        assert_eq!(decoded.payload, vec![5; 10]);
    }

    #[test]
    fn pad_to_boundary_is_noop_when_aligned() {
        let mut text = String::from("abcd");
        pad_to_boundary(&mut text, 4, 4);
        assert_eq!(text, "abcd");

        pad_to_boundary(&mut text, 0, 8);
        assert_eq!(text, "abcd    ");
    }
}
