use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::BurrowError;

/// Byte width of a decimal cell, indexed by declared precision.
const DECIMAL_WIDTH: [usize; 19] = [1, 1, 1, 2, 2, 3, 3, 4, 4, 4, 5, 5, 6, 6, 6, 7, 7, 8, 8];

/// Declared type of a table or index column.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DataType {
    /// Variable-length bytes, stored as an interned handle.
    Binary,
    /// Variable-length UTF-8 text, stored as an interned handle.
    String,
    /// 64-bit signed integer.
    Bigint,
    /// 64-bit IEEE-754 float.
    Double,
    /// 32-bit signed integer.
    Int,
    /// 32-bit IEEE-754 float.
    Float,
    /// 16-bit signed integer.
    Smallint,
    /// 8-bit signed integer.
    Tinyint,
    /// Single byte boolean.
    Bool,
    /// Scaled fixed-point integer; `precision` selects the cell width.
    Decimal {
        /// Total number of decimal digits (1..=18); 0 is stored like 1.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
}

/// Storage family of a type. Columns may only be retyped within a family.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BaseType {
    /// Integers, decimals.
    Int,
    /// Single and double precision floats.
    Float,
    /// Booleans.
    Bool,
    /// Interned strings.
    Str,
    /// Interned byte strings.
    Bin,
}

impl DataType {
    /// Width in bytes of one fixed-size cell.
    pub fn size(self) -> usize {
        match self {
            DataType::Binary | DataType::String | DataType::Bigint | DataType::Double => 8,
            DataType::Int | DataType::Float => 4,
            DataType::Smallint => 2,
            DataType::Tinyint | DataType::Bool => 1,
            DataType::Decimal { precision, .. } => {
                DECIMAL_WIDTH[usize::from(precision).min(DECIMAL_WIDTH.len() - 1)]
            }
        }
    }

    /// Storage family used to decide whether a retype keeps cell contents meaningful.
    pub fn base(self) -> BaseType {
        match self {
            DataType::Binary => BaseType::Bin,
            DataType::String => BaseType::Str,
            DataType::Double | DataType::Float => BaseType::Float,
            DataType::Bool => BaseType::Bool,
            DataType::Bigint
            | DataType::Int
            | DataType::Smallint
            | DataType::Tinyint
            | DataType::Decimal { .. } => BaseType::Int,
        }
    }

    /// Value a freshly added column takes in existing rows.
    pub fn default_value(self) -> Value {
        match self.base() {
            BaseType::Int => Value::Int(0),
            BaseType::Float => Value::Float(0.0),
            BaseType::Bool => Value::Bool(false),
            BaseType::Str => Value::Str(Arc::from("")),
            BaseType::Bin => Value::Bin(Arc::from(Vec::new())),
        }
    }

    /// True when cells hold value-pool handles rather than inline values.
    pub fn is_interned(self) -> bool {
        matches!(self, DataType::Binary | DataType::String)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Binary => f.write_str("binary"),
            DataType::String => f.write_str("string"),
            DataType::Bigint => f.write_str("bigint"),
            DataType::Double => f.write_str("double"),
            DataType::Int => f.write_str("int"),
            DataType::Float => f.write_str("float"),
            DataType::Smallint => f.write_str("smallint"),
            DataType::Tinyint => f.write_str("tinyint"),
            DataType::Bool => f.write_str("bool"),
            DataType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
        }
    }
}

impl FromStr for DataType {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let ty = match lower.as_str() {
            "binary" => DataType::Binary,
            "string" => DataType::String,
            "bigint" => DataType::Bigint,
            "double" => DataType::Double,
            "int" => DataType::Int,
            "float" => DataType::Float,
            "smallint" => DataType::Smallint,
            "tinyint" => DataType::Tinyint,
            "bool" => DataType::Bool,
            other => return parse_decimal(other),
        };
        Ok(ty)
    }
}

fn parse_decimal(s: &str) -> Result<DataType, BurrowError> {
    let bad = || BurrowError::InvalidOwned(format!("unknown data type '{s}'"));
    let args = s
        .strip_prefix("decimal(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(bad)?;
    let (p, sc) = args.split_once(',').unwrap_or((args, "0"));
    let precision: u8 = p.trim().parse().map_err(|_| bad())?;
    let scale: u8 = sc.trim().parse().map_err(|_| bad())?;
    if precision == 0 || precision > 18 || scale > precision {
        return Err(bad());
    }
    Ok(DataType::Decimal { precision, scale })
}

/// A single column value as seen by callers of the engine.
#[derive(Clone, Debug)]
pub enum Value {
    /// Integer, decimal (scaled) or row id.
    Int(i64),
    /// Float or double.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Text.
    Str(Arc<str>),
    /// Bytes.
    Bin(Arc<[u8]>),
}

impl Value {
    /// Builds a text value.
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Builds a byte-string value.
    pub fn bin(b: &[u8]) -> Self {
        Value::Bin(Arc::from(b))
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Bin(_) => 4,
        }
    }

    /// Total order used by index keys: numeric for numbers, ordinal for
    /// text, byte-wise for binary, `false < true` for booleans.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Int(a), Value::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Float(a), Value::Int(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Bin(a), Value::Bin(b)) => a.as_ref().cmp(b.as_ref()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "'{v}'"),
            Value::Bin(v) => write!(f, "0x{}", hex::encode(v)),
        }
    }
}

/// Writes the 64-bit image `bits` of a `ty` cell into `dst` (little-endian,
/// truncated to the cell width). Float cells take `f64` bits and store them
/// narrowed to `f32`.
pub fn encode_cell(dst: &mut [u8], bits: u64, ty: DataType) {
    let width = ty.size();
    let raw = match ty {
        DataType::Float => u64::from((f64::from_bits(bits) as f32).to_bits()),
        _ => bits,
    };
    dst[..width].copy_from_slice(&raw.to_le_bytes()[..width]);
}

/// Reads the 64-bit image of a `ty` cell from `src`. Narrow integers are
/// sign-extended, `Float` cells are widened back to `f64` bits.
pub fn decode_cell(src: &[u8], ty: DataType) -> u64 {
    let width = ty.size();
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&src[..width]);
    let raw = u64::from_le_bytes(buf);
    match ty {
        DataType::Float => (f64::from(f32::from_bits(raw as u32))).to_bits(),
        DataType::Bool | DataType::Binary | DataType::String => raw,
        _ if width > 0 && width < 8 => {
            let shift = 64 - 8 * width as u32;
            (((raw << shift) as i64) >> shift) as u64
        }
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_widths_follow_declared_type() {
        assert_eq!(DataType::Bigint.size(), 8);
        assert_eq!(DataType::Int.size(), 4);
        assert_eq!(DataType::Smallint.size(), 2);
        assert_eq!(DataType::Bool.size(), 1);
        assert_eq!(
            DataType::Decimal {
                precision: 9,
                scale: 2
            }
            .size(),
            4
        );
        assert_eq!(
            DataType::Decimal {
                precision: 18,
                scale: 0
            }
            .size(),
            8
        );
    }

    #[test]
    fn narrow_integers_sign_extend() {
        let mut buf = [0u8; 8];
        encode_cell(&mut buf, (-5i64) as u64, DataType::Smallint);
        assert_eq!(&buf[2..], &[0; 6]);
        assert_eq!(decode_cell(&buf, DataType::Smallint) as i64, -5);
        encode_cell(&mut buf, (-1i64) as u64, DataType::Tinyint);
        assert_eq!(decode_cell(&buf, DataType::Tinyint) as i64, -1);
    }

    #[test]
    fn float_cells_are_narrowed() {
        let mut buf = [0u8; 4];
        encode_cell(&mut buf, 1.5f64.to_bits(), DataType::Float);
        assert_eq!(f64::from_bits(decode_cell(&buf, DataType::Float)), 1.5);
    }

    #[test]
    fn parses_type_names() {
        assert_eq!("INT".parse::<DataType>().unwrap(), DataType::Int);
        assert_eq!(
            "decimal(10, 2)".parse::<DataType>().unwrap(),
            DataType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert!("decimal(30,2)".parse::<DataType>().is_err());
        assert!("varchar".parse::<DataType>().is_err());
    }

    #[test]
    fn value_ordering() {
        assert_eq!(Value::Int(-3).compare(&Value::Int(2)), Ordering::Less);
        assert_eq!(Value::str("B").compare(&Value::str("a")), Ordering::Less);
        assert_eq!(
            Value::bin(&[1, 2]).compare(&Value::bin(&[1, 2, 0])),
            Ordering::Less
        );
        assert_eq!(
            Value::Bool(false).compare(&Value::Bool(true)),
            Ordering::Less
        );
    }
}
