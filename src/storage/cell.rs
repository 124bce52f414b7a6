//! Conversion between [`Value`]s and fixed-width cells.

use crate::storage::pool::{NoInterning, ValueInterner};
use crate::types::{decode_cell, encode_cell, BaseType, BurrowError, DataType, Result, Value};

fn mismatch(value: &Value, ty: DataType) -> BurrowError {
    BurrowError::InvalidOwned(format!("value {value} does not fit column type {ty}"))
}

fn check_width(v: i64, ty: DataType) -> Result<i64> {
    let width = ty.size();
    if width < 8 {
        let bits = 8 * width as u32;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if v < min || v > max {
            return Err(BurrowError::InvalidOwned(format!(
                "value {v} out of range for {ty}"
            )));
        }
    }
    Ok(v)
}

/// Maps `value` to the 64-bit image stored for a `ty` cell, interning
/// strings and byte strings.
pub fn to_bits(value: &Value, ty: DataType, interner: &dyn ValueInterner) -> Result<u64> {
    let bits = match (ty.base(), value) {
        (BaseType::Int, Value::Int(v)) => check_width(*v, ty)? as u64,
        (BaseType::Float, Value::Float(v)) => v.to_bits(),
        (BaseType::Float, Value::Int(v)) => (*v as f64).to_bits(),
        (BaseType::Bool, Value::Bool(b)) => u64::from(*b),
        (BaseType::Str, Value::Str(s)) => interner.intern_str(s)?,
        (BaseType::Bin, Value::Bin(b)) => interner.intern_bytes(b)?,
        _ => return Err(mismatch(value, ty)),
    };
    Ok(bits)
}

/// Inverse of [`to_bits`].
pub fn from_bits(bits: u64, ty: DataType, interner: &dyn ValueInterner) -> Result<Value> {
    let value = match ty.base() {
        BaseType::Int => Value::Int(bits as i64),
        BaseType::Float => Value::Float(f64::from_bits(bits)),
        BaseType::Bool => Value::Bool(bits != 0),
        BaseType::Str => Value::Str(interner.resolve_str(bits)?),
        BaseType::Bin => Value::Bin(interner.resolve_bytes(bits)?),
    };
    Ok(value)
}

/// Encodes `value` into the first `ty.size()` bytes of `dst`.
pub fn write_cell(
    dst: &mut [u8],
    value: &Value,
    ty: DataType,
    interner: &dyn ValueInterner,
) -> Result<()> {
    let bits = to_bits(value, ty, interner)?;
    encode_cell(dst, bits, ty);
    Ok(())
}

/// Decodes the cell at the front of `src`.
pub fn read_cell(src: &[u8], ty: DataType, interner: &dyn ValueInterner) -> Result<Value> {
    from_bits(decode_cell(src, ty), ty, interner)
}

/// Rounds `value` the way storing it in a `ty` cell would, so that
/// comparisons against stored cells are exact. Interned types pass through.
pub fn normalize(value: &Value, ty: DataType) -> Result<Value> {
    if ty.is_interned() {
        return match (ty.base(), value) {
            (BaseType::Str, Value::Str(_)) | (BaseType::Bin, Value::Bin(_)) => Ok(value.clone()),
            _ => Err(mismatch(value, ty)),
        };
    }
    let bits = to_bits(value, ty, &NoInterning)?;
    let mut cell = [0u8; 8];
    encode_cell(&mut cell, bits, ty);
    from_bits(decode_cell(&cell, ty), ty, &NoInterning)
}
