use bytes::Bytes;

/// Unrecognized command or malformed input.
pub const ERR_UNKNOWN: i32 = 0;
/// Serialized response would exceed the frame limit.
pub const ERR_TOO_BIG: i32 = 1;

const TAG_NIL: u8 = 0;
const TAG_ERR: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_ARR: u8 = 4;

/// A response value: a tagged union, recursive through arrays.
///
/// On the wire each variant is its tag byte followed by the payload; all
/// integers are little-endian.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Err { code: i32, message: String },
    Str(Bytes),
    Int(i64),
    Arr(Vec<Value>),
}

impl Value {
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Value::Err {
            code,
            message: message.into(),
        }
    }

    /// Serialize into `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Value::Nil => out.push(TAG_NIL),
            Value::Err { code, message } => {
                out.push(TAG_ERR);
                out.extend_from_slice(&code.to_le_bytes());
                out.extend_from_slice(&(message.len() as u32).to_le_bytes());
                out.extend_from_slice(message.as_bytes());
            }
            Value::Str(bytes) => {
                out.push(TAG_STR);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Value::Int(n) => {
                out.push(TAG_INT);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Value::Arr(items) => {
                out.push(TAG_ARR);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.write(out);
                }
            }
        }
    }

    /// Decode one value from the head of `buf`, returning it together with
    /// the number of bytes consumed.
    pub fn read(buf: &[u8]) -> Result<(Value, usize), String> {
        let (value, rest) = Self::read_inner(buf)?;
        Ok((value, buf.len() - rest.len()))
    }

    fn read_inner(buf: &[u8]) -> Result<(Value, &[u8]), String> {
        let (&tag, rest) = buf.split_first().ok_or_else(truncated)?;
        match tag {
            TAG_NIL => Ok((Value::Nil, rest)),
            TAG_ERR => {
                let (code, rest) = read_i32(rest)?;
                let (len, rest) = read_u32(rest)?;
                let (bytes, rest) = read_bytes(rest, len as usize)?;
                let message = String::from_utf8_lossy(bytes).into_owned();
                Ok((Value::Err { code, message }, rest))
            }
            TAG_STR => {
                let (len, rest) = read_u32(rest)?;
                let (bytes, rest) = read_bytes(rest, len as usize)?;
                Ok((Value::Str(Bytes::copy_from_slice(bytes)), rest))
            }
            TAG_INT => {
                let (n, rest) = read_i64(rest)?;
                Ok((Value::Int(n), rest))
            }
            TAG_ARR => {
                let (count, mut rest) = read_u32(rest)?;
                let mut items = Vec::new();
                for _ in 0..count {
                    let (item, tail) = Self::read_inner(rest)?;
                    items.push(item);
                    rest = tail;
                }
                Ok((Value::Arr(items), rest))
            }
            other => Err(format!("invalid value tag: {other}")),
        }
    }
}

fn truncated() -> String {
    "truncated value".to_string()
}

pub(crate) fn read_u32(buf: &[u8]) -> Result<(u32, &[u8]), String> {
    let (head, rest) = buf.split_first_chunk::<4>().ok_or_else(truncated)?;
    Ok((u32::from_le_bytes(*head), rest))
}

fn read_i32(buf: &[u8]) -> Result<(i32, &[u8]), String> {
    let (head, rest) = buf.split_first_chunk::<4>().ok_or_else(truncated)?;
    Ok((i32::from_le_bytes(*head), rest))
}

fn read_i64(buf: &[u8]) -> Result<(i64, &[u8]), String> {
    let (head, rest) = buf.split_first_chunk::<8>().ok_or_else(truncated)?;
    Ok((i64::from_le_bytes(*head), rest))
}

pub(crate) fn read_bytes(buf: &[u8], len: usize) -> Result<(&[u8], &[u8]), String> {
    if buf.len() < len {
        return Err(truncated());
    }
    Ok(buf.split_at(len))
}
