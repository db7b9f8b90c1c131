//! Wire protocol: length-prefixed request framing, tagged response
//! values, and the command layer built on top of both.

pub mod command;
pub mod frame;
pub mod value;

pub use command::{parse_command, Command, CommandExecutor};
pub use frame::{encode_request, extract_request, write_frame, MAX_ARGS, MAX_FRAME_SIZE};
pub use value::{Value, ERR_TOO_BIG, ERR_UNKNOWN};
