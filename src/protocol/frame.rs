use bytes::Bytes;

use super::value::{read_bytes, read_u32};

/// A full frame, length prefix included, must fit in this many bytes.
pub const MAX_FRAME_SIZE: usize = 4096;
/// Upper bound on one request's argument count.
pub const MAX_ARGS: usize = 1024;

/// Bytes of the `u32` length prefix.
const PREFIX: usize = 4;

/// Encode one request frame: `u32` body length (prefix excluded), `u32`
/// argument count, then each argument as `u32` length plus bytes.
pub fn encode_request(args: &[&[u8]], out: &mut Vec<u8>) -> Result<(), String> {
    if args.len() > MAX_ARGS {
        return Err(format!("too many arguments: {}", args.len()));
    }
    let body_len = 4 + args.iter().map(|a| 4 + a.len()).sum::<usize>();
    if PREFIX + body_len > MAX_FRAME_SIZE {
        return Err(format!("request of {} bytes exceeds the frame limit", body_len));
    }
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        out.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        out.extend_from_slice(arg);
    }
    Ok(())
}

/// Try to pull one complete request frame off the head of `buf`.
///
/// `Ok(None)` means more bytes are needed. `Ok(Some((args, consumed)))`
/// hands back the argument list and how many buffer bytes it covered.
/// `Err` is a protocol violation and is fatal to the connection: an
/// oversized frame, too many arguments, or a body that does not end
/// exactly at the declared length.
pub fn extract_request(buf: &[u8]) -> Result<Option<(Vec<Bytes>, usize)>, String> {
    let Some((head, _)) = buf.split_first_chunk::<PREFIX>() else {
        return Ok(None);
    };
    let body_len = u32::from_le_bytes(*head) as usize;
    if PREFIX + body_len > MAX_FRAME_SIZE {
        return Err(format!(
            "frame of {} bytes exceeds the {} byte limit",
            PREFIX + body_len,
            MAX_FRAME_SIZE
        ));
    }
    if buf.len() < PREFIX + body_len {
        return Ok(None);
    }
    let args = parse_body(&buf[PREFIX..PREFIX + body_len])?;
    Ok(Some((args, PREFIX + body_len)))
}

fn parse_body(body: &[u8]) -> Result<Vec<Bytes>, String> {
    let (argc, mut rest) = read_u32(body)?;
    if argc as usize > MAX_ARGS {
        return Err(format!("argument count {argc} exceeds the limit"));
    }
    let mut args = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        let (len, tail) = read_u32(rest)?;
        let (bytes, tail) = read_bytes(tail, len as usize)?;
        args.push(Bytes::copy_from_slice(bytes));
        rest = tail;
    }
    if !rest.is_empty() {
        return Err("trailing bytes after the declared frame length".to_string());
    }
    Ok(args)
}

/// Append `payload` to `out` wrapped in the length-prefix framing.
pub fn write_frame(payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Whether a response payload of this size fits inside one frame.
pub fn payload_fits(payload_len: usize) -> bool {
    PREFIX + payload_len <= MAX_FRAME_SIZE
}
