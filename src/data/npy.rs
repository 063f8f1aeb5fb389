//! Minimal `.npy` reader and writer for dense C-order arrays
//!
//! Reads boolean, `u8` and little-endian `f32` payloads into `f32`; writes
//! `|b1` (binary piano-rolls) or `<f4`.

use crate::error::{Error, Result};

const MAGIC: &[u8] = b"\x93NUMPY";

/// Element types understood by [`read_npy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Bool,
    U8,
    F32,
}

impl DType {
    fn parse(descr: &str) -> Option<Self> {
        match descr {
            "|b1" => Some(Self::Bool),
            "|u1" | "<u1" => Some(Self::U8),
            "<f4" => Some(Self::F32),
            _ => None,
        }
    }

    fn descr(self) -> &'static str {
        match self {
            Self::Bool => "|b1",
            Self::U8 => "|u1",
            Self::F32 => "<f4",
        }
    }

    fn width(self) -> usize {
        match self {
            Self::Bool | Self::U8 => 1,
            Self::F32 => 4,
        }
    }
}

/// A decoded array
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub data: Vec<f32>,
}

fn malformed(message: impl Into<String>) -> Error {
    Error::Serialization(format!("npy: {}", message.into()))
}

/// Value of `'key': value` in the header dictionary, up to the next top-level comma
fn header_field<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let pattern = format!("'{key}':");
    let start = header
        .find(&pattern)
        .map(|i| i + pattern.len())
        .ok_or_else(|| malformed(format!("header has no '{key}'")))?;
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find(|c| c == ',' || c == '}')
    }
    .ok_or_else(|| malformed(format!("unterminated '{key}'")))?;
    Ok(rest[..end].trim())
}

fn parse_shape(field: &str) -> Result<Vec<usize>> {
    field
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| malformed(format!("bad dimension '{s}'"))))
        .collect()
}

/// Decode a `.npy` byte buffer
pub fn read_npy(bytes: &[u8]) -> Result<NpyArray> {
    if bytes.len() < 10 || !bytes.starts_with(MAGIC) {
        return Err(malformed("missing magic string"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(malformed("truncated header length"));
            }
            (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
        }
        v => return Err(malformed(format!("unsupported version {v}"))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| malformed("unreadable header"))?;

    let descr = header_field(header, "descr")?.trim_matches('\'');
    let dtype =
        DType::parse(descr).ok_or_else(|| malformed(format!("unsupported dtype '{descr}'")))?;
    if header_field(header, "fortran_order")? != "False" {
        return Err(malformed("Fortran-ordered arrays are not supported"));
    }
    let shape = parse_shape(header_field(header, "shape")?)?;

    let count: usize = shape.iter().product();
    let payload = &bytes[data_start.min(bytes.len())..];
    if payload.len() != count * dtype.width() {
        return Err(malformed(format!(
            "expected {} payload bytes for shape {shape:?}, found {}",
            count * dtype.width(),
            payload.len()
        )));
    }

    let data = match dtype {
        DType::Bool | DType::U8 => payload.iter().map(|&b| f32::from(b)).collect(),
        DType::F32 => payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    };
    Ok(NpyArray { shape, dtype, data })
}

/// Encode a C-order array; `Bool` stores `v != 0`
pub fn write_npy(shape: &[usize], data: &[f32], dtype: DType) -> Result<Vec<u8>> {
    let count: usize = shape.iter().product();
    if count != data.len() {
        return Err(Error::shape(&[count], &[data.len()]));
    }
    let dims: Vec<String> = shape.iter().map(usize::to_string).collect();
    let shape_text = match dims.len() {
        1 => format!("({},)", dims[0]),
        _ => format!("({})", dims.join(", ")),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {shape_text}, }}",
        dtype.descr()
    );
    // Pad so the payload starts on a 64-byte boundary, header ends in '\n'
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let header_len = u16::try_from(header.len())
        .map_err(|_| Error::Serialization("npy: header too long".into()))?;
    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + count * dtype.width());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    match dtype {
        DType::Bool => out.extend(data.iter().map(|&v| u8::from(v != 0.0))),
        DType::U8 => out.extend(data.iter().map(|&v| v.clamp(0.0, 255.0) as u8)),
        DType::F32 => {
            for v in data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    Ok(out)
}
