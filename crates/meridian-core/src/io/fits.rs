//! Minimal FITS container I/O.
//!
//! Reads and writes single-HDU 2D images: 2880-byte blocks, 80-character
//! header cards, big-endian data. Integer data is converted to physical
//! values via BZERO/BSCALE on read; output is always written as BITPIX -64
//! so combined frames round-trip without loss.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::{MeridianError, Result};
use crate::frame::Frame;

/// Typed FITS header value.
#[derive(Clone, Debug, PartialEq)]
pub enum FitsValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FitsValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Logical(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Real(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered key-value header of a FITS HDU.
///
/// Keywords are stored uppercase in insertion order; `set_*` replaces an
/// existing card in place so provenance keys keep a stable position.
#[derive(Clone, Debug, Default)]
pub struct FitsHeader {
    cards: Vec<(String, FitsValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FitsValue> {
        let key = key.to_ascii_uppercase();
        self.cards.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(FitsValue::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FitsValue::as_i64)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FitsValue::as_f64)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FitsValue::as_str)
    }

    pub fn set(&mut self, key: &str, value: FitsValue) {
        let key = key.to_ascii_uppercase();
        match self.cards.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.cards.push((key, value)),
        }
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, FitsValue::Logical(value));
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.set(key, FitsValue::Integer(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.set(key, FitsValue::Real(value));
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.set(key, FitsValue::Text(value.to_string()));
    }

    pub fn remove(&mut self, key: &str) {
        let key = key.to_ascii_uppercase();
        self.cards.retain(|(k, _)| *k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FitsValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> MeridianError {
    MeridianError::InvalidFits {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Read the primary HDU of a FITS file into a [`Frame`].
pub fn read_fits(path: &Path) -> Result<Frame> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < FITS_BLOCK_SIZE {
        return Err(invalid(path, "file too small for a FITS header block"));
    }

    let (header, data_start) = parse_header(&mmap, path)?;

    if header.get("SIMPLE").is_none() {
        return Err(invalid(path, "missing SIMPLE card"));
    }
    let bitpix = header
        .get_int("BITPIX")
        .ok_or_else(|| invalid(path, "missing BITPIX card"))?;
    let naxis = header
        .get_int("NAXIS")
        .ok_or_else(|| invalid(path, "missing NAXIS card"))?;
    if naxis != 2 {
        return Err(invalid(path, format!("expected NAXIS=2, got {naxis}")));
    }
    let width = header
        .get_int("NAXIS1")
        .ok_or_else(|| invalid(path, "missing NAXIS1 card"))? as usize;
    let height = header
        .get_int("NAXIS2")
        .ok_or_else(|| invalid(path, "missing NAXIS2 card"))? as usize;
    if width == 0 || height == 0 {
        return Err(invalid(path, "no data in primary HDU"));
    }

    let bzero = header.get_float("BZERO").unwrap_or(0.0);
    let bscale = header.get_float("BSCALE").unwrap_or(1.0);

    let bytes_per_value = match bitpix {
        8 => 1,
        16 => 2,
        32 | -32 => 4,
        -64 => 8,
        other => return Err(invalid(path, format!("unsupported BITPIX {other}"))),
    };
    let npix = width
        .checked_mul(height)
        .ok_or_else(|| invalid(path, "image dimensions too large"))?;
    let data_len = npix * bytes_per_value;
    if mmap.len() < data_start + data_len {
        return Err(invalid(
            path,
            format!(
                "data truncated: expected {} bytes, file holds {}",
                data_start + data_len,
                mmap.len()
            ),
        ));
    }

    let raw = &mmap[data_start..data_start + data_len];
    let mut data = Array2::<f64>::zeros((height, width));
    {
        let flat = data
            .as_slice_mut()
            .expect("freshly allocated array is contiguous");
        match bitpix {
            8 => {
                for (out, b) in flat.iter_mut().zip(raw.iter()) {
                    *out = bzero + bscale * *b as f64;
                }
            }
            16 => {
                for (i, out) in flat.iter_mut().enumerate() {
                    let v = i16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]);
                    *out = bzero + bscale * v as f64;
                }
            }
            32 => {
                for (i, out) in flat.iter_mut().enumerate() {
                    let v = i32::from_be_bytes([
                        raw[4 * i],
                        raw[4 * i + 1],
                        raw[4 * i + 2],
                        raw[4 * i + 3],
                    ]);
                    *out = bzero + bscale * v as f64;
                }
            }
            -32 => {
                for (i, out) in flat.iter_mut().enumerate() {
                    let v = f32::from_be_bytes([
                        raw[4 * i],
                        raw[4 * i + 1],
                        raw[4 * i + 2],
                        raw[4 * i + 3],
                    ]);
                    *out = bzero + bscale * v as f64;
                }
            }
            -64 => {
                for (i, out) in flat.iter_mut().enumerate() {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&raw[8 * i..8 * i + 8]);
                    *out = bzero + bscale * f64::from_be_bytes(buf);
                }
            }
            _ => unreachable!(),
        }
    }

    // Scaling keys describe the on-disk encoding, not the physical frame.
    let mut header = header;
    header.remove("BZERO");
    header.remove("BSCALE");

    Ok(Frame::new(data, header))
}

/// Read only the primary header of a FITS file, skipping the data unit.
pub fn read_fits_header(path: &Path) -> Result<FitsHeader> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    if mmap.len() < FITS_BLOCK_SIZE {
        return Err(invalid(path, "file too small for a FITS header block"));
    }
    let (header, _) = parse_header(&mmap, path)?;
    Ok(header)
}

/// Parse header blocks until the END card. Returns the header and the byte
/// offset where the data unit begins.
fn parse_header(bytes: &[u8], path: &Path) -> Result<(FitsHeader, usize)> {
    let mut header = FitsHeader::new();
    let mut offset = 0;

    loop {
        if bytes.len() < offset + FITS_BLOCK_SIZE {
            return Err(invalid(path, "header not terminated by END card"));
        }
        let block = &bytes[offset..offset + FITS_BLOCK_SIZE];
        offset += FITS_BLOCK_SIZE;

        for card in block.chunks(FITS_CARD_SIZE) {
            if !card.is_ascii() {
                return Err(invalid(path, "non-ASCII header card"));
            }
            let card = std::str::from_utf8(card)
                .map_err(|_| invalid(path, "non-ASCII header card"))?;
            let keyword = card[..8].trim_end();
            if keyword == "END" {
                return Ok((header, offset));
            }
            if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
                continue;
            }
            if &card[8..10] != "= " {
                continue;
            }
            if let Some(value) = parse_card_value(&card[10..]) {
                header.set(keyword, value);
            }
        }
    }
}

fn parse_card_value(field: &str) -> Option<FitsValue> {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        // Quoted string; embedded quotes are doubled.
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return Some(FitsValue::Text(out.trim_end().to_string()));
    }

    // Strip the inline comment, then classify the bare token.
    let token = field.split('/').next()?.trim();
    match token {
        "" => None,
        "T" => Some(FitsValue::Logical(true)),
        "F" => Some(FitsValue::Logical(false)),
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                Some(FitsValue::Integer(i))
            } else {
                token.parse::<f64>().ok().map(FitsValue::Real)
            }
        }
    }
}

/// Write a [`Frame`] as a single-HDU FITS file, overwriting any existing
/// file at `path`. The write is all-or-nothing per file: no partial-write
/// recovery is attempted.
pub fn write_fits(path: &Path, frame: &Frame) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let (height, width) = frame.shape();
    let mut cards: Vec<String> = Vec::new();
    cards.push(format_card("SIMPLE", &FitsValue::Logical(true)));
    cards.push(format_card("BITPIX", &FitsValue::Integer(-64)));
    cards.push(format_card("NAXIS", &FitsValue::Integer(2)));
    cards.push(format_card("NAXIS1", &FitsValue::Integer(width as i64)));
    cards.push(format_card("NAXIS2", &FitsValue::Integer(height as i64)));

    for (key, value) in frame.header.iter() {
        if matches!(
            key,
            "SIMPLE" | "BITPIX" | "NAXIS" | "NAXIS1" | "NAXIS2" | "BZERO" | "BSCALE" | "END"
        ) {
            continue;
        }
        cards.push(format_card(key, value));
    }
    cards.push(format!("{:<80}", "END"));

    let mut writer = BufWriter::new(File::create(path)?);
    let mut header_bytes = 0;
    for card in &cards {
        writer.write_all(card.as_bytes())?;
        header_bytes += FITS_CARD_SIZE;
    }
    while header_bytes % FITS_BLOCK_SIZE != 0 {
        writer.write_all(&[b' '; FITS_CARD_SIZE])?;
        header_bytes += FITS_CARD_SIZE;
    }

    let mut data_bytes = 0;
    for row in frame.data.rows() {
        for &v in row {
            writer.write_f64::<BigEndian>(v)?;
            data_bytes += 8;
        }
    }
    let pad = (FITS_BLOCK_SIZE - data_bytes % FITS_BLOCK_SIZE) % FITS_BLOCK_SIZE;
    writer.write_all(&vec![0u8; pad])?;
    writer.flush()?;

    Ok(())
}

fn format_card(key: &str, value: &FitsValue) -> String {
    let body = match value {
        FitsValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        FitsValue::Integer(i) => format!("{i:>20}"),
        FitsValue::Real(f) => format!("{:>20}", format_real(*f)),
        FitsValue::Text(s) => {
            let escaped = s.replace('\'', "''");
            format!("'{escaped:<8}'")
        }
    };
    // Header cards are ASCII by definition; anything else is replaced.
    let mut card: String = format!("{key:<8}= {body}")
        .chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect();
    card.truncate(FITS_CARD_SIZE);
    format!("{card:<80}")
}

/// Shortest decimal that round-trips, forced into FITS real syntax
/// (always a decimal point, uppercase exponent).
fn format_real(v: f64) -> String {
    let mut s = format!("{v}");
    if s.contains('e') {
        s = s.replace('e', "E");
    }
    if !s.contains('.') && !s.contains('E') {
        s.push_str(".0");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_values_parse_back() {
        assert_eq!(parse_card_value("                   T / flag"), Some(FitsValue::Logical(true)));
        assert_eq!(parse_card_value("                 300"), Some(FitsValue::Integer(300)));
        assert_eq!(parse_card_value("               300.0 / s"), Some(FitsValue::Real(300.0)));
        assert_eq!(
            parse_card_value("'Ha      '           / filter"),
            Some(FitsValue::Text("Ha".to_string()))
        );
    }

    #[test]
    fn real_formatting_round_trips() {
        for v in [0.0, 2.0, -1.5, 0.333333333333333315, 1e-9, 6.02e23] {
            let s = format_real(v);
            assert!(s.contains('.') || s.contains('E'), "{s}");
            assert_eq!(s.replace('E', "e").parse::<f64>().unwrap(), v);
        }
    }

    #[test]
    fn cards_are_exactly_80_bytes() {
        let card = format_card("EXPTIME", &FitsValue::Real(300.0));
        assert_eq!(card.len(), 80);
        let card = format_card("FILTER", &FitsValue::Text("L".into()));
        assert_eq!(card.len(), 80);
    }
}
