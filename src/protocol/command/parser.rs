use super::Command;
use bytes::Bytes;

/// Parse a request's argument list into a command.
///
/// Dispatch is by case-insensitive keyword plus argument count; anything
/// else is an error the caller reports in-band, leaving the connection
/// open.
pub fn parse_command(mut args: Vec<Bytes>) -> Result<Command, String> {
    if args.is_empty() {
        return Err("empty command".to_string());
    }
    let name = args.remove(0);
    let keyword = name.to_ascii_uppercase();

    match &keyword[..] {
        b"GET" => {
            let [key] = exact_args("GET", args)?;
            Ok(Command::Get(key.to_vec()))
        }
        b"SET" => {
            let [key, value] = exact_args("SET", args)?;
            Ok(Command::Set {
                key: key.to_vec(),
                value,
            })
        }
        b"DEL" => {
            let [key] = exact_args("DEL", args)?;
            Ok(Command::Del(key.to_vec()))
        }
        b"KEYS" => {
            exact_args::<0>("KEYS", args)?;
            Ok(Command::Keys)
        }
        b"ZADD" => {
            let [key, score, member] = exact_args("ZADD", args)?;
            Ok(Command::ZAdd {
                key: key.to_vec(),
                score: parse_float(&score)?,
                member: member.to_vec(),
            })
        }
        b"ZREM" => {
            let [key, member] = exact_args("ZREM", args)?;
            Ok(Command::ZRem {
                key: key.to_vec(),
                member: member.to_vec(),
            })
        }
        b"ZSCORE" => {
            let [key, member] = exact_args("ZSCORE", args)?;
            Ok(Command::ZScore {
                key: key.to_vec(),
                member: member.to_vec(),
            })
        }
        b"ZQUERY" => {
            let [key, score, member, offset, limit] = exact_args("ZQUERY", args)?;
            Ok(Command::ZQuery {
                key: key.to_vec(),
                score: parse_float(&score)?,
                member: member.to_vec(),
                offset: parse_int(&offset)?,
                limit: parse_int(&limit)?,
            })
        }
        _ => Err(format!(
            "unknown command '{}'",
            String::from_utf8_lossy(&name)
        )),
    }
}

/// Require exactly N arguments, moving them out of the vector.
fn exact_args<const N: usize>(keyword: &str, args: Vec<Bytes>) -> Result<[Bytes; N], String> {
    <[Bytes; N]>::try_from(args)
        .map_err(|_| format!("wrong number of arguments for '{keyword}' command"))
}

fn parse_float(arg: &[u8]) -> Result<f64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| "expected a floating point number".to_string())
}

fn parse_int(arg: &[u8]) -> Result<i64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| "expected an integer".to_string())
}
