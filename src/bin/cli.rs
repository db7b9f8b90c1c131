use std::io::{Read, Write};
use std::net::TcpStream;

use clap::Parser;
use marlinkv::protocol::{encode_request, Value, MAX_FRAME_SIZE};

#[derive(Parser, Debug)]
#[command(author, version, about = "MarlinKV command line client", long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 3535)]
    port: u16,

    /// Command and its arguments, e.g. `set key value`
    #[arg(required = true)]
    command: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))?;

    let parts: Vec<&[u8]> = args.command.iter().map(|s| s.as_bytes()).collect();
    let mut request = Vec::new();
    encode_request(&parts, &mut request).map_err(anyhow::Error::msg)?;
    stream.write_all(&request)?;

    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let len = u32::from_le_bytes(prefix) as usize;
    anyhow::ensure!(4 + len <= MAX_FRAME_SIZE, "oversized response frame");
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;

    let (value, consumed) = Value::read(&payload).map_err(anyhow::Error::msg)?;
    anyhow::ensure!(consumed == payload.len(), "trailing bytes in response frame");
    print_value(&value, 0);
    Ok(())
}

fn print_value(value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Nil => println!("{pad}(nil)"),
        Value::Err { code, message } => println!("{pad}(err) [{code}] {message}"),
        Value::Str(bytes) => println!("{pad}(str) {}", String::from_utf8_lossy(bytes)),
        Value::Int(n) => {
            let mut buf = itoa::Buffer::new();
            println!("{pad}(int) {}", buf.format(*n));
        }
        Value::Arr(items) => {
            let mut buf = itoa::Buffer::new();
            println!("{pad}(arr) len={}", buf.format(items.len()));
            for item in items {
                print_value(item, indent + 1);
            }
        }
    }
}
