use bytes::Bytes;

mod executor;
mod parser;

pub use executor::CommandExecutor;
pub use parser::parse_command;

/// A parsed request, dispatch-ready.
#[derive(Debug, Clone)]
pub enum Command {
    Get(Vec<u8>),
    Set {
        key: Vec<u8>,
        value: Bytes,
    },
    Del(Vec<u8>),
    Keys,

    // Sorted-set commands
    ZAdd {
        key: Vec<u8>,
        score: f64,
        member: Vec<u8>,
    },
    ZRem {
        key: Vec<u8>,
        member: Vec<u8>,
    },
    ZScore {
        key: Vec<u8>,
        member: Vec<u8>,
    },
    ZQuery {
        key: Vec<u8>,
        score: f64,
        member: Vec<u8>,
        offset: i64,
        limit: i64,
    },
}
