//! Type codecs for register words and display strings.
//!
//! A [`Model`] describes how a dynamic [`Value`] maps onto raw register
//! bytes (little-endian, `bits` wide) and onto the display strings used at
//! protocol boundaries. Decoding always masks the raw word first, so bytes
//! above the word width never leak into typed values.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Dynamic value shared by the tree, the command engine and the remote
/// protocol.
pub type Value = serde_json::Value;

/// Base type of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Unsigned integer.
    UInt,
    /// Two's complement signed integer.
    Int,
    /// Boolean, any non-zero word reads as `true`.
    Bool,
    /// IEEE-754 float, 32 or 64 bits.
    Float,
    /// Fixed-width NUL padded UTF-8 text.
    Str,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UInt => "uint",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Str => "str",
        };
        f.write_str(name)
    }
}

/// Access policy of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Read-only.
    RO,
    /// Read-write.
    #[default]
    RW,
    /// Write-only.
    WO,
}

impl Mode {
    /// True unless write-only.
    pub fn readable(self) -> bool {
        self != Self::WO
    }

    /// True unless read-only.
    pub fn writable(self) -> bool {
        self != Self::RO
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Radix used when rendering integer display strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    /// Decimal.
    #[default]
    Dec,
    /// `0x` prefixed hexadecimal.
    Hex,
    /// `0b` prefixed binary.
    Bin,
}

/// Errors raised while encoding, decoding or parsing values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Width not supported by the kind.
    #[error("unsupported width of {bits} bits for {kind}")]
    InvalidWidth {
        /// Model kind
        kind: ModelKind,
        /// Requested width
        bits: u32,
    },

    /// Value has the wrong shape for the kind.
    #[error("value {value} cannot be encoded as {kind}")]
    Unrepresentable {
        /// Model kind
        kind: ModelKind,
        /// Rendered offending value
        value: String,
    },

    /// Display string could not be parsed.
    #[error("cannot parse '{text}' as {kind}")]
    Parse {
        /// Model kind
        kind: ModelKind,
        /// Offending text
        text: String,
    },

    /// Raw buffer shorter than one word.
    #[error("buffer holds {actual} bytes, {expected} needed")]
    ShortBuffer {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },
}

/// Typed codec: kind plus bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    kind: ModelKind,
    bits: u32,
}

impl Model {
    /// 32-bit unsigned register word.
    pub const UINT32: Model = Model {
        kind: ModelKind::UInt,
        bits: 32,
    };
    /// 64-bit unsigned register word.
    pub const UINT64: Model = Model {
        kind: ModelKind::UInt,
        bits: 64,
    };
    /// 32-bit signed register word.
    pub const INT32: Model = Model {
        kind: ModelKind::Int,
        bits: 32,
    };
    /// Single bit flag.
    pub const BOOL: Model = Model {
        kind: ModelKind::Bool,
        bits: 1,
    };
    /// Single precision float.
    pub const FLOAT: Model = Model {
        kind: ModelKind::Float,
        bits: 32,
    };
    /// Double precision float.
    pub const DOUBLE: Model = Model {
        kind: ModelKind::Float,
        bits: 64,
    };

    /// Build a model, rejecting widths the kind cannot represent.
    pub fn new(kind: ModelKind, bits: u32) -> Result<Self, ModelError> {
        let valid = match kind {
            ModelKind::UInt | ModelKind::Int | ModelKind::Bool => (1..=64).contains(&bits),
            ModelKind::Float => bits == 32 || bits == 64,
            ModelKind::Str => bits > 0 && bits % 8 == 0,
        };
        if valid {
            Ok(Self { kind, bits })
        } else {
            Err(ModelError::InvalidWidth { kind, bits })
        }
    }

    /// Base type.
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Width in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Bytes needed to hold one value.
    pub fn byte_size(&self) -> usize {
        self.bits.div_ceil(8) as usize
    }

    /// Bit mask of one word.
    pub fn mask(&self) -> u64 {
        word_mask(self.bits)
    }

    /// Value a freshly created variable of this model holds.
    pub fn default_value(&self) -> Value {
        match self.kind {
            ModelKind::UInt | ModelKind::Int => Value::from(0),
            ModelKind::Bool => Value::Bool(false),
            ModelKind::Float => Value::from(0.0),
            ModelKind::Str => Value::String(String::new()),
        }
    }

    /// Convert a value to its masked raw word. Not defined for `Str`.
    pub fn to_word(&self, value: &Value) -> Result<u64, ModelError> {
        let word = match (self.kind, value) {
            (ModelKind::Bool, Value::Bool(b)) => u64::from(*b),
            (ModelKind::Bool, Value::Number(n)) => {
                u64::from(n.as_f64().is_some_and(|f| f != 0.0))
            }
            (ModelKind::UInt, Value::Bool(b)) | (ModelKind::Int, Value::Bool(b)) => u64::from(*b),
            (ModelKind::UInt, Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
                (Some(u), _) => u,
                (None, Some(f)) if f >= 0.0 && f.fract() == 0.0 && n.as_i64().is_none() => {
                    f as u64
                }
                _ => return Err(self.unrepresentable(value)),
            },
            (ModelKind::Int, Value::Number(n)) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => i as u64,
                (None, Some(u)) => u,
                _ => return Err(self.unrepresentable(value)),
            },
            (ModelKind::Float, Value::Number(n)) => {
                let f = n.as_f64().ok_or_else(|| self.unrepresentable(value))?;
                if self.bits == 32 {
                    u64::from((f as f32).to_bits())
                } else {
                    f.to_bits()
                }
            }
            _ => return Err(self.unrepresentable(value)),
        };
        Ok(word & self.mask())
    }

    /// Interpret a raw word (masked first). Not defined for `Str`.
    pub fn from_word(&self, word: u64) -> Value {
        let word = word & self.mask();
        match self.kind {
            ModelKind::UInt => Value::from(word),
            ModelKind::Int => Value::from(sign_extend(word, self.bits)),
            ModelKind::Bool => Value::Bool(word != 0),
            ModelKind::Float if self.bits == 32 => {
                Value::from(f64::from(f32::from_bits(word as u32)))
            }
            ModelKind::Float => Value::from(f64::from_bits(word)),
            ModelKind::Str => Value::String(String::new()),
        }
    }

    /// Encode into exactly `byte_size()` little-endian bytes.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, ModelError> {
        let size = self.byte_size();
        if self.kind == ModelKind::Str {
            let text = value.as_str().ok_or_else(|| self.unrepresentable(value))?;
            if text.len() > size {
                return Err(self.unrepresentable(value));
            }
            let mut out = text.as_bytes().to_vec();
            out.resize(size, 0);
            return Ok(out);
        }
        let word = self.to_word(value)?;
        Ok(word.to_le_bytes()[..size].to_vec())
    }

    /// Decode the first `byte_size()` bytes of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, ModelError> {
        let size = self.byte_size();
        if bytes.len() < size {
            return Err(ModelError::ShortBuffer {
                expected: size,
                actual: bytes.len(),
            });
        }
        if self.kind == ModelKind::Str {
            let raw = &bytes[..size];
            let end = raw.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
            return Ok(Value::String(
                String::from_utf8_lossy(&raw[..end]).into_owned(),
            ));
        }
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes[..size]);
        Ok(self.from_word(u64::from_le_bytes(buf)))
    }

    /// Parse a display string. Integers accept `0x` and `0b` prefixes.
    pub fn parse_display(&self, text: &str) -> Result<Value, ModelError> {
        let t = text.trim();
        let parse_err = || ModelError::Parse {
            kind: self.kind,
            text: text.to_string(),
        };
        match self.kind {
            ModelKind::UInt => {
                let word = parse_unsigned(t).ok_or_else(parse_err)?;
                Ok(Value::from(word & self.mask()))
            }
            ModelKind::Int => {
                let (negative, digits) = match t.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, t),
                };
                let magnitude = parse_unsigned(digits).ok_or_else(parse_err)?;
                let magnitude = i64::try_from(magnitude).map_err(|_| parse_err())?;
                Ok(Value::from(if negative { -magnitude } else { magnitude }))
            }
            ModelKind::Bool => match t {
                "true" | "True" | "1" => Ok(Value::Bool(true)),
                "false" | "False" | "0" => Ok(Value::Bool(false)),
                _ => Err(parse_err()),
            },
            ModelKind::Float => t
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| parse_err()),
            ModelKind::Str => Ok(Value::String(text.to_string())),
        }
    }

    /// Render a value as a display string.
    pub fn display(&self, value: &Value, format: DisplayFormat) -> String {
        if value.is_null() {
            return String::new();
        }
        match self.kind {
            ModelKind::UInt | ModelKind::Int => match self.to_word(value) {
                Ok(word) => match format {
                    DisplayFormat::Hex => format!("{word:#x}"),
                    DisplayFormat::Bin => format!("{word:#b}"),
                    DisplayFormat::Dec if self.kind == ModelKind::Int => {
                        sign_extend(word, self.bits).to_string()
                    }
                    DisplayFormat::Dec => word.to_string(),
                },
                Err(_) => value.to_string(),
            },
            ModelKind::Bool => match self.to_word(value) {
                Ok(0) => "false".to_string(),
                Ok(_) => "true".to_string(),
                Err(_) => value.to_string(),
            },
            ModelKind::Float => value
                .as_f64()
                .map_or_else(|| value.to_string(), |f| f.to_string()),
            ModelKind::Str => value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string),
        }
    }

    fn unrepresentable(&self, value: &Value) -> ModelError {
        ModelError::Unrepresentable {
            kind: self.kind,
            value: value.to_string(),
        }
    }
}

/// Mask covering the low `bits` bits.
pub fn word_mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Clear every bit at or above `bits` in each `stride`-sized little-endian
/// word of `buf`.
pub fn mask_words(buf: &mut [u8], bits: u32, stride: usize) {
    if stride == 0 {
        return;
    }
    for word in buf.chunks_mut(stride) {
        for (idx, byte) in word.iter_mut().enumerate() {
            let low = (idx as u32) * 8;
            if low >= bits {
                *byte = 0;
            } else if low + 8 > bits {
                *byte &= ((1u16 << (bits - low)) - 1) as u8;
            }
        }
    }
}

fn sign_extend(word: u64, bits: u32) -> i64 {
    if bits >= 64 {
        return word as i64;
    }
    let sign = 1u64 << (bits - 1);
    if word & sign != 0 {
        (word | !word_mask(bits)) as i64
    } else {
        word as i64
    }
}

fn parse_unsigned(text: &str) -> Option<u64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = cleaned
        .strip_prefix("0b")
        .or_else(|| cleaned.strip_prefix("0B"))
    {
        u64::from_str_radix(bin, 2).ok()
    } else {
        cleaned.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_invalid_widths_rejected() {
        assert!(Model::new(ModelKind::UInt, 0).is_err());
        assert!(Model::new(ModelKind::UInt, 65).is_err());
        assert!(Model::new(ModelKind::Float, 16).is_err());
        assert!(Model::new(ModelKind::Str, 12).is_err());
        assert!(Model::new(ModelKind::Int, 12).is_ok());
    }

    #[test]
    fn test_uint_encode_is_little_endian_and_masked() {
        let model = Model::new(ModelKind::UInt, 12).unwrap();
        assert_eq!(model.encode(&json!(0xFABC)).unwrap(), vec![0xBC, 0x0A]);
    }

    #[test]
    fn test_uint_rejects_negative_and_text() {
        assert!(Model::UINT32.encode(&json!(-1)).is_err());
        assert!(Model::UINT32.encode(&json!("12")).is_err());
    }

    #[test]
    fn test_int_sign_extends() {
        let model = Model::new(ModelKind::Int, 12).unwrap();
        let bytes = model.encode(&json!(-3)).unwrap();
        assert_eq!(model.decode(&bytes).unwrap(), json!(-3));
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = Model::UINT32.decode(&[1, 2]).unwrap_err();
        assert_eq!(
            err,
            ModelError::ShortBuffer {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_float_decode() {
        let bytes = Model::FLOAT.encode(&json!(1.5)).unwrap();
        assert_eq!(Model::FLOAT.decode(&bytes).unwrap(), json!(1.5));
    }

    #[test]
    fn test_str_padding() {
        let model = Model::new(ModelKind::Str, 64).unwrap();
        let bytes = model.encode(&json!("abc")).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(model.decode(&bytes).unwrap(), json!("abc"));
        assert!(model.encode(&json!("too long for it")).is_err());
    }

    #[test]
    fn test_parse_display() {
        assert_eq!(Model::UINT32.parse_display("0x10").unwrap(), json!(16));
        assert_eq!(Model::UINT32.parse_display("0b101").unwrap(), json!(5));
        assert_eq!(Model::UINT32.parse_display(" 42 ").unwrap(), json!(42));
        assert_eq!(Model::INT32.parse_display("-0x10").unwrap(), json!(-16));
        assert_eq!(Model::BOOL.parse_display("True").unwrap(), json!(true));
        assert!(Model::UINT32.parse_display("ten").is_err());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(Model::UINT32.display(&json!(255), DisplayFormat::Hex), "0xff");
        assert_eq!(Model::UINT32.display(&json!(5), DisplayFormat::Bin), "0b101");
        assert_eq!(Model::INT32.display(&json!(-2), DisplayFormat::Dec), "-2");
        assert_eq!(Model::BOOL.display(&json!(1), DisplayFormat::Dec), "true");
        assert_eq!(Model::UINT32.display(&Value::Null, DisplayFormat::Dec), "");
    }

    #[test]
    fn test_mask_words_per_stride() {
        let mut buf = vec![0xFF; 8];
        mask_words(&mut buf, 12, 4);
        assert_eq!(buf, vec![0xFF, 0x0F, 0, 0, 0xFF, 0x0F, 0, 0]);
    }

    proptest! {
        #[test]
        fn prop_uint_decode_is_masked_value(bits in 1u32..=64, value in any::<u64>()) {
            let model = Model::new(ModelKind::UInt, bits).unwrap();
            let mut raw = value.to_le_bytes().to_vec();
            raw.truncate(model.byte_size());
            let decoded = model.decode(&raw).unwrap();
            prop_assert_eq!(decoded, json!(value & word_mask(bits)));
        }

        #[test]
        fn prop_uint_display_roundtrip(bits in 1u32..=64, value in any::<u64>()) {
            let model = Model::new(ModelKind::UInt, bits).unwrap();
            let masked = json!(value & word_mask(bits));
            let text = model.display(&masked, DisplayFormat::Hex);
            prop_assert_eq!(model.parse_display(&text).unwrap(), masked);
        }
    }
}
