//! Decoding of raw controller bytes into numeric values.
//!
//! All multi-byte types are big-endian, the native order of S7-style data
//! blocks. Booleans decode to `1.0`/`0.0` so every type flows through the
//! same linear transform.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Real,
    Int,
    Dint,
    Word,
    Dword,
    Bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("{data_type} needs {expected} bytes, got {got}")]
    LengthMismatch {
        data_type: DataType,
        expected: usize,
        got: usize,
    },

    #[error("bit index {0} out of range 0..=7")]
    BitOutOfRange(u8),
}

impl DataType {
    /// Bytes read from the controller for one value of this type.
    pub fn byte_len(self) -> usize {
        match self {
            DataType::Real | DataType::Dint | DataType::Dword => 4,
            DataType::Int | DataType::Word => 2,
            DataType::Bool => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Real => "REAL",
            DataType::Int => "INT",
            DataType::Dint => "DINT",
            DataType::Word => "WORD",
            DataType::Dword => "DWORD",
            DataType::Bool => "BOOL",
        }
    }

    /// Decode `bytes` as this type. `bit` is only consulted for `BOOL`.
    pub fn decode(self, bytes: &[u8], bit: u8) -> Result<f64, DecodeError> {
        match self {
            DataType::Real => Ok(f32::from_be_bytes(self.exact::<4>(bytes)?) as f64),
            DataType::Int => Ok(i16::from_be_bytes(self.exact::<2>(bytes)?) as f64),
            DataType::Dint => Ok(i32::from_be_bytes(self.exact::<4>(bytes)?) as f64),
            DataType::Word => Ok(u16::from_be_bytes(self.exact::<2>(bytes)?) as f64),
            DataType::Dword => Ok(u32::from_be_bytes(self.exact::<4>(bytes)?) as f64),
            DataType::Bool => {
                let [byte] = self.exact::<1>(bytes)?;
                if bit > 7 {
                    return Err(DecodeError::BitOutOfRange(bit));
                }
                Ok(if byte & (1 << bit) != 0 { 1.0 } else { 0.0 })
            }
        }
    }

    fn exact<const N: usize>(self, bytes: &[u8]) -> Result<[u8; N], DecodeError> {
        bytes.try_into().map_err(|_| DecodeError::LengthMismatch {
            data_type: self,
            expected: N,
            got: bytes.len(),
        })
    }
}

impl FromStr for DataType {
    type Err = DecodeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "REAL" => Ok(DataType::Real),
            "INT" => Ok(DataType::Int),
            "DINT" => Ok(DataType::Dint),
            "WORD" => Ok(DataType::Word),
            "DWORD" => Ok(DataType::Dword),
            "BOOL" => Ok(DataType::Bool),
            _ => Err(DecodeError::UnsupportedType(tag.to_string())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte length required by a textual type tag.
pub fn type_size(tag: &str) -> Result<usize, DecodeError> {
    Ok(tag.parse::<DataType>()?.byte_len())
}

/// Decode `bytes` according to a textual type tag.
pub fn decode(tag: &str, bytes: &[u8], bit: u8) -> Result<f64, DecodeError> {
    tag.parse::<DataType>()?.decode(bytes, bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_type_width() {
        assert_eq!(type_size("REAL").unwrap(), 4);
        assert_eq!(type_size("DINT").unwrap(), 4);
        assert_eq!(type_size("DWORD").unwrap(), 4);
        assert_eq!(type_size("INT").unwrap(), 2);
        assert_eq!(type_size("WORD").unwrap(), 2);
        assert_eq!(type_size("BOOL").unwrap(), 1);
    }

    #[test]
    fn tags_are_case_insensitive() {
        assert_eq!("real".parse::<DataType>().unwrap(), DataType::Real);
        assert_eq!("Dword".parse::<DataType>().unwrap(), DataType::Dword);
        assert_eq!(" bool ".parse::<DataType>().unwrap(), DataType::Bool);
    }

    #[test]
    fn unknown_tag_is_a_decode_error() {
        assert_eq!(
            type_size("FOO").unwrap_err(),
            DecodeError::UnsupportedType("FOO".to_string())
        );
        let err = decode("FOO", &[0, 0, 0, 0], 0).unwrap_err();
        assert_eq!(err.to_string(), "unsupported type: FOO");
    }

    #[test]
    fn real_matches_ieee754_big_endian() {
        assert_eq!(decode("REAL", &[0x42, 0x48, 0x00, 0x00], 0).unwrap(), 50.0);
        let bytes = (-12.5f32).to_be_bytes();
        let value = decode("REAL", &bytes, 0).unwrap();
        assert_eq!(value, -12.5);
        assert_eq!((value as f32).to_be_bytes(), bytes);
    }

    #[test]
    fn signed_types_keep_their_sign() {
        let int_bytes = (-1234i16).to_be_bytes();
        let int = decode("INT", &int_bytes, 0).unwrap();
        assert_eq!(int, -1234.0);
        assert_eq!((int as i16).to_be_bytes(), int_bytes);

        let dint_bytes = (-70_000i32).to_be_bytes();
        let dint = decode("DINT", &dint_bytes, 0).unwrap();
        assert_eq!(dint, -70_000.0);
        assert_eq!((dint as i32).to_be_bytes(), dint_bytes);
    }

    #[test]
    fn unsigned_types_reach_their_maximum() {
        let word = decode("WORD", &[0xFF, 0xFF], 0).unwrap();
        assert_eq!(word, u16::MAX as f64);
        assert_eq!((word as u16).to_be_bytes(), [0xFF, 0xFF]);

        let dword = decode("DWORD", &[0xFF, 0xFF, 0xFF, 0xFF], 0).unwrap();
        assert_eq!(dword, u32::MAX as f64);
        assert_eq!((dword as u32).to_be_bytes(), [0xFF; 4]);
    }

    #[test]
    fn bool_reads_the_addressed_bit() {
        assert_eq!(decode("BOOL", &[0x08], 3).unwrap(), 1.0);
        assert_eq!(decode("BOOL", &[0x00], 3).unwrap(), 0.0);
        assert_eq!(decode("BOOL", &[0x01], 0).unwrap(), 1.0);
        assert_eq!(decode("BOOL", &[0x80], 7).unwrap(), 1.0);
    }

    #[test]
    fn bool_rejects_bit_past_seven() {
        assert_eq!(
            decode("BOOL", &[0xFF], 8).unwrap_err(),
            DecodeError::BitOutOfRange(8)
        );
    }

    #[test]
    fn wrong_length_is_reported_not_panicked() {
        let err = decode("DINT", &[0x00, 0x01], 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                data_type: DataType::Dint,
                expected: 4,
                got: 2,
            }
        );
    }
}
