//! Typed PLC values.
//!
//! Declared type names from the symbol table (`BOOL`, `INT`, `LREAL`,
//! `STRING(80)`, ...) are looked up in a fixed table that yields the byte width
//! plus the decode and encode functions for that type. Unknown types fall back
//! to raw bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::fmt;

/// Default byte width of a plain `STRING` (80 characters + terminator).
pub const DEFAULT_STRING_WIDTH: usize = 81;

/// Longest declared `STRING(n)` accepted as a text type.
pub const MAX_STRING_CHARS: usize = 65_535;

/// A value read from or written to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum AdsValue {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point
    Real(f64),
    /// Text
    String(String),
    /// Uninterpreted bytes
    Bytes(Vec<u8>),
}

impl AdsValue {
    /// Shape name used in error messages.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Real(_) => "number",
            Self::String(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a JSON value supplied by a caller.
    ///
    /// Besides plain JSON scalars and byte arrays, the envelope
    /// `{"type": "ams", "encoding": "base64", "data": "..."}` is accepted and
    /// yields raw bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON has no value mapping.
    pub fn from_json(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Ok(Self::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Real).ok_or(ValueError::Unsupported {
                        detail: format!("number {n}"),
                    })
                }
            }
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| ValueError::Unsupported {
                            detail: format!("array element {item} is not a byte"),
                        })
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Self::Bytes),
            Value::Object(map) => {
                let is_envelope = map.get("type").and_then(Value::as_str) == Some("ams")
                    && map.get("encoding").and_then(Value::as_str) == Some("base64");
                let data = map.get("data").and_then(Value::as_str);
                match (is_envelope, data) {
                    (true, Some(data)) => STANDARD
                        .decode(data)
                        .map(Self::Bytes)
                        .map_err(|e| ValueError::Unsupported {
                            detail: format!("base64 payload: {e}"),
                        }),
                    _ => Err(ValueError::Unsupported {
                        detail: "object payload".to_string(),
                    }),
                }
            }
            Value::Null => Err(ValueError::Unsupported {
                detail: "null payload".to_string(),
            }),
        }
    }

    /// Convert to JSON for reporting.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::from(*b),
            Self::Int(i) => Value::from(*i),
            Self::UInt(u) => Value::from(*u),
            Self::Real(f) => Value::from(*f),
            Self::String(s) => Value::from(s.as_str()),
            Self::Bytes(bytes) => Value::from(bytes.clone()),
        }
    }

    /// Smallest of 1, 2, 4 or 8 bytes that holds this value.
    #[must_use]
    pub fn natural_width(&self) -> usize {
        match self {
            Self::Bool(_) => 1,
            Self::UInt(u) => unsigned_width(*u),
            Self::Int(i) if *i >= 0 => unsigned_width(i.unsigned_abs()),
            Self::Int(i) => {
                if i8::try_from(*i).is_ok() {
                    1
                } else if i16::try_from(*i).is_ok() {
                    2
                } else if i32::try_from(*i).is_ok() {
                    4
                } else {
                    8
                }
            }
            Self::Real(f) => {
                #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
                let exact = f64::from(*f as f32) == *f;
                if exact {
                    4
                } else {
                    8
                }
            }
            Self::String(s) => s.len() + 1,
            Self::Bytes(b) => b.len(),
        }
    }
}

impl fmt::Display for AdsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "{b:?}"),
        }
    }
}

/// How a type lays its bytes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// 1 byte, nonzero is true
    Bool,
    /// Unsigned little-endian integer
    Unsigned,
    /// Signed little-endian integer
    Signed,
    /// IEEE-754 little-endian float
    Float,
    /// Null-terminated text
    Text,
}

/// Entry in the declared-type table.
#[derive(Clone, Copy)]
pub struct AdsType {
    /// Canonical PLC type name
    pub name: &'static str,
    /// Byte width on the device
    pub width: usize,
    /// Byte layout
    pub class: TypeClass,
    decode: fn(&[u8], usize) -> AdsValue,
    encode: fn(&AdsValue, usize) -> Result<Vec<u8>, ValueError>,
}

impl fmt::Debug for AdsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdsType")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("class", &self.class)
            .finish()
    }
}

impl PartialEq for AdsType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.width == other.width
    }
}

macro_rules! ads_type {
    ($name:literal, $width:expr, $class:ident, $decode:path, $encode:path) => {
        AdsType {
            name: $name,
            width: $width,
            class: TypeClass::$class,
            decode: $decode,
            encode: $encode,
        }
    };
}

const TYPE_TABLE: &[(&[&str], AdsType)] = &[
    (&["BOOL", "BIT"], ads_type!("BOOL", 1, Bool, decode_bool, encode_bool)),
    (&["BYTE", "USINT"], ads_type!("USINT", 1, Unsigned, decode_unsigned, encode_unsigned)),
    (&["SINT"], ads_type!("SINT", 1, Signed, decode_signed, encode_signed)),
    (&["WORD", "UINT"], ads_type!("UINT", 2, Unsigned, decode_unsigned, encode_unsigned)),
    (&["INT"], ads_type!("INT", 2, Signed, decode_signed, encode_signed)),
    (
        &["DWORD", "UDINT", "TIME", "TOD", "TIME_OF_DAY", "DATE", "DT", "DATE_AND_TIME"],
        ads_type!("UDINT", 4, Unsigned, decode_unsigned, encode_unsigned),
    ),
    (&["DINT"], ads_type!("DINT", 4, Signed, decode_signed, encode_signed)),
    (&["REAL"], ads_type!("REAL", 4, Float, decode_float, encode_float)),
    (&["LWORD", "ULINT"], ads_type!("ULINT", 8, Unsigned, decode_unsigned, encode_unsigned)),
    (&["LINT"], ads_type!("LINT", 8, Signed, decode_signed, encode_signed)),
    (&["LREAL"], ads_type!("LREAL", 8, Float, decode_float, encode_float)),
    (
        &["STRING"],
        ads_type!("STRING", DEFAULT_STRING_WIDTH, Text, decode_text, encode_text),
    ),
];

impl AdsType {
    /// Look up a declared type name (case-insensitive).
    ///
    /// `STRING(n)` resolves to a text type of `n + 1` bytes; a bare `STRING`
    /// uses `string_width`. A length above [`MAX_STRING_CHARS`] is not a
    /// known type.
    #[must_use]
    pub fn lookup(name: &str, string_width: usize) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix("STRING") {
            let text = Self::text();
            if rest.is_empty() {
                return Some(Self {
                    width: string_width,
                    ..text
                });
            }
            let chars: usize = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .and_then(|n| n.trim().parse().ok())
                .filter(|&n| n <= MAX_STRING_CHARS)?;
            return Some(Self {
                width: chars.checked_add(1)?,
                ..text
            });
        }

        TYPE_TABLE
            .iter()
            .find(|(aliases, _)| aliases.contains(&upper.as_str()))
            .map(|(_, ty)| *ty)
    }

    fn text() -> Self {
        TYPE_TABLE
            .iter()
            .map(|(_, ty)| *ty)
            .find(|ty| ty.class == TypeClass::Text)
            .unwrap_or(ads_type!(
                "STRING",
                DEFAULT_STRING_WIDTH,
                Text,
                decode_text,
                encode_text
            ))
    }

    /// Decode device bytes.
    ///
    /// # Errors
    ///
    /// Returns error if fewer bytes than the type width were returned
    /// (text may be shorter; it stops at the first null).
    pub fn decode(&self, bytes: &[u8]) -> Result<AdsValue, ValueError> {
        if self.class != TypeClass::Text && bytes.len() < self.width {
            return Err(ValueError::ShortData {
                type_name: self.name,
                expected: self.width,
                actual: bytes.len(),
            });
        }
        Ok((self.decode)(bytes, self.width))
    }

    /// Encode a value into exactly the type width.
    ///
    /// # Errors
    ///
    /// Returns error if the value does not fit the width or its shape does
    /// not map to this type.
    pub fn encode(&self, value: &AdsValue) -> Result<Vec<u8>, ValueError> {
        (self.encode)(value, self.width).map_err(|err| match err {
            ValueError::Overflow { value, width, .. } => ValueError::Overflow {
                value,
                width,
                type_name: Some(self.name),
            },
            ValueError::Shape { found, .. } => ValueError::Shape {
                expected: self.name,
                found,
            },
            other => other,
        })
    }
}

/// Byte width of a declared type, if known.
#[must_use]
pub fn byte_width(type_name: &str, string_width: usize) -> Option<usize> {
    AdsType::lookup(type_name, string_width).map(|ty| ty.width)
}

/// Decode `bytes` by declared type name; unknown or absent types pass through as raw bytes.
///
/// # Errors
///
/// Returns error if a known type receives fewer bytes than its width.
pub fn decode_value(type_name: Option<&str>, bytes: &[u8]) -> Result<AdsValue, ValueError> {
    match type_name.and_then(|name| AdsType::lookup(name, bytes.len().max(1))) {
        Some(ty) => ty.decode(bytes),
        None => Ok(AdsValue::Bytes(bytes.to_vec())),
    }
}

/// Encode `value` for a symbol of declared `type_name` and byte `size`.
///
/// The declared type decides the layout when known (a text type takes the
/// declared size as its width). Otherwise the width is inferred from `size`.
///
/// # Errors
///
/// Returns error if neither a type nor a size is available, if the value's
/// natural width exceeds the declared width, or if its shape cannot map.
pub fn encode_value(
    type_name: Option<&str>,
    size: Option<usize>,
    value: &AdsValue,
) -> Result<Vec<u8>, ValueError> {
    let declared = type_name.and_then(|name| AdsType::lookup(name, size.unwrap_or(DEFAULT_STRING_WIDTH)));

    if let Some(ty) = declared {
        if let Some(size) = size {
            if ty.width > size {
                return Err(ValueError::WidthMismatch {
                    type_name: ty.name,
                    width: ty.width,
                    size,
                });
            }
        }
        return ty.encode(value);
    }

    let size = size.ok_or(ValueError::UnknownWidth)?;
    encode_for_size(value, size)
}

/// Encode without a declared type, inferring the layout from the value shape.
fn encode_for_size(value: &AdsValue, size: usize) -> Result<Vec<u8>, ValueError> {
    match value {
        AdsValue::Bool(_) | AdsValue::Int(_) | AdsValue::UInt(_) => {
            let natural = value.natural_width();
            if natural > size {
                return Err(ValueError::Overflow {
                    value: value.to_string(),
                    width: size,
                    type_name: None,
                });
            }
            if !matches!(size, 1 | 2 | 4 | 8) {
                return Err(ValueError::Shape {
                    expected: "1, 2, 4 or 8 byte field",
                    found: value.shape(),
                });
            }
            match value {
                AdsValue::Int(i) if *i < 0 => encode_signed(value, size),
                _ => encode_unsigned(value, size),
            }
        }
        AdsValue::Real(_) => match size {
            4 | 8 => encode_float(value, size),
            _ => Err(ValueError::Shape {
                expected: "4 or 8 byte field",
                found: value.shape(),
            }),
        },
        AdsValue::String(_) => encode_text(value, size),
        AdsValue::Bytes(bytes) => {
            if bytes.len() > size {
                return Err(ValueError::Overflow {
                    value: format!("{} bytes", bytes.len()),
                    width: size,
                    type_name: None,
                });
            }
            let mut out = bytes.clone();
            out.resize(size, 0);
            Ok(out)
        }
    }
}

fn unsigned_width(value: u64) -> usize {
    if value <= u64::from(u8::MAX) {
        1
    } else if value <= u64::from(u16::MAX) {
        2
    } else if value <= u64::from(u32::MAX) {
        4
    } else {
        8
    }
}

fn le_bytes(bytes: &[u8], width: usize) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&bytes[..width]);
    buf
}

fn decode_bool(bytes: &[u8], _width: usize) -> AdsValue {
    AdsValue::Bool(bytes[0] != 0)
}

fn decode_unsigned(bytes: &[u8], width: usize) -> AdsValue {
    AdsValue::UInt(u64::from_le_bytes(le_bytes(bytes, width)))
}

fn decode_signed(bytes: &[u8], width: usize) -> AdsValue {
    let raw = u64::from_le_bytes(le_bytes(bytes, width));
    let shift = 64 - 8 * width as u32;
    #[allow(clippy::cast_possible_wrap)]
    let value = ((raw << shift) as i64) >> shift;
    AdsValue::Int(value)
}

fn decode_float(bytes: &[u8], width: usize) -> AdsValue {
    if width == 4 {
        AdsValue::Real(f64::from(f32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    } else {
        AdsValue::Real(f64::from_le_bytes(le_bytes(bytes, 8)))
    }
}

fn decode_text(bytes: &[u8], width: usize) -> AdsValue {
    let limit = bytes.len().min(width);
    let text = &bytes[..limit];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    AdsValue::String(String::from_utf8_lossy(&text[..end]).into_owned())
}

fn encode_bool(value: &AdsValue, width: usize) -> Result<Vec<u8>, ValueError> {
    let flag = match value {
        AdsValue::Bool(b) => *b,
        AdsValue::UInt(u @ (0 | 1)) => *u == 1,
        AdsValue::Int(i @ (0 | 1)) => *i == 1,
        other => {
            return Err(ValueError::Shape {
                expected: "BOOL",
                found: other.shape(),
            })
        }
    };
    let mut out = vec![0u8; width];
    out[0] = u8::from(flag);
    Ok(out)
}

fn integral(value: &AdsValue) -> Result<i128, ValueError> {
    match value {
        AdsValue::Bool(b) => Ok(i128::from(*b)),
        AdsValue::Int(i) => Ok(i128::from(*i)),
        AdsValue::UInt(u) => Ok(i128::from(*u)),
        #[allow(clippy::cast_possible_truncation)]
        AdsValue::Real(f) if f.is_finite() && f.fract() == 0.0 => Ok(*f as i128),
        other => Err(ValueError::Shape {
            expected: "integer",
            found: other.shape(),
        }),
    }
}

fn encode_unsigned(value: &AdsValue, width: usize) -> Result<Vec<u8>, ValueError> {
    let n = integral(value)?;
    let max = (1i128 << (8 * width)) - 1;
    if n < 0 || n > max {
        return Err(ValueError::Overflow {
            value: value.to_string(),
            width,
            type_name: None,
        });
    }
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let bytes = (n as u64).to_le_bytes();
    Ok(bytes[..width].to_vec())
}

fn encode_signed(value: &AdsValue, width: usize) -> Result<Vec<u8>, ValueError> {
    let n = integral(value)?;
    let bound = 1i128 << (8 * width - 1);
    if n < -bound || n >= bound {
        return Err(ValueError::Overflow {
            value: value.to_string(),
            width,
            type_name: None,
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let bytes = (n as i64).to_le_bytes();
    Ok(bytes[..width].to_vec())
}

fn encode_float(value: &AdsValue, width: usize) -> Result<Vec<u8>, ValueError> {
    #[allow(clippy::cast_precision_loss)]
    let f = match value {
        AdsValue::Real(f) => *f,
        AdsValue::Int(i) => *i as f64,
        AdsValue::UInt(u) => *u as f64,
        other => {
            return Err(ValueError::Shape {
                expected: "floating point",
                found: other.shape(),
            })
        }
    };
    if width == 4 {
        if f.is_finite() && f.abs() > f64::from(f32::MAX) {
            return Err(ValueError::Overflow {
                value: value.to_string(),
                width,
                type_name: None,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok((f as f32).to_le_bytes().to_vec())
    } else {
        Ok(f.to_le_bytes().to_vec())
    }
}

fn encode_text(value: &AdsValue, width: usize) -> Result<Vec<u8>, ValueError> {
    let AdsValue::String(text) = value else {
        return Err(ValueError::Shape {
            expected: "STRING",
            found: value.shape(),
        });
    };
    let mut out = vec![0u8; width];
    let keep = text.len().min(width.saturating_sub(1));
    out[..keep].copy_from_slice(&text.as_bytes()[..keep]);
    Ok(out)
}

/// Errors raised packing or unpacking values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// Value needs more bytes than the field has
    #[error("value {value} does not fit in {width} byte(s)")]
    Overflow {
        /// Rendered value
        value: String,
        /// Field width
        width: usize,
        /// Declared type, if any
        type_name: Option<&'static str>,
    },
    /// Value shape cannot map to the field
    #[error("cannot encode {found} as {expected}")]
    Shape {
        /// What the field takes
        expected: &'static str,
        /// What the caller supplied
        found: &'static str,
    },
    /// Declared type is wider than the symbol
    #[error("type {type_name} needs {width} bytes but the symbol has {size}")]
    WidthMismatch {
        /// Declared type
        type_name: &'static str,
        /// Type width
        width: usize,
        /// Symbol size
        size: usize,
    },
    /// Neither type nor size available
    #[error("no declared type or size to encode against")]
    UnknownWidth,
    /// Device returned fewer bytes than the type needs
    #[error("{type_name} needs {expected} bytes, got {actual}")]
    ShortData {
        /// Declared type
        type_name: &'static str,
        /// Type width
        expected: usize,
        /// Bytes received
        actual: usize,
    },
    /// Payload form not supported
    #[error("unsupported payload: {detail}")]
    Unsupported {
        /// What was rejected
        detail: String,
    },
}
