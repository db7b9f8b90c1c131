use super::{parse_command, Command};
use crate::protocol::value::{Value, ERR_UNKNOWN};
use crate::store::{Object, SortedSet, Store};
use bytes::Bytes;

/// Executes parsed commands against the keyspace.
///
/// Owns the store for the lifetime of the process; the event loop drives
/// it from a single thread, so each command runs to completion before the
/// next begins.
pub struct CommandExecutor {
    store: Store,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self {
            store: Store::new(),
        }
    }

    /// Parse and execute one request's argument list.
    ///
    /// Parse failures come back as in-band error values; only framing
    /// violations (handled upstream) terminate a connection.
    pub fn dispatch(&mut self, args: Vec<Bytes>) -> Value {
        match parse_command(args) {
            Ok(command) => self.execute(command),
            Err(message) => Value::error(ERR_UNKNOWN, message),
        }
    }

    pub fn execute(&mut self, command: Command) -> Value {
        match command {
            Command::Get(key) => match self.store.get_mut(&key) {
                Some(Object::Str(value)) => Value::Str(value.clone()),
                Some(Object::Sorted(_)) => string_type_error(),
                None => Value::Nil,
            },

            Command::Set { key, value } => match self.store.get_mut(&key) {
                Some(Object::Str(stored)) => {
                    *stored = value;
                    Value::Nil
                }
                Some(Object::Sorted(_)) => string_type_error(),
                None => {
                    self.store.insert(key, Object::Str(value));
                    Value::Nil
                }
            },

            Command::Del(key) => Value::Int(i64::from(self.store.remove(&key).is_some())),

            Command::Keys => Value::Arr(self.store.keys().into_iter().map(Value::Str).collect()),

            Command::ZAdd { key, score, member } => match self.store.get_mut(&key) {
                Some(Object::Sorted(set)) => Value::Int(i64::from(set.add(&member, score))),
                Some(Object::Str(_)) => sorted_type_error(),
                None => {
                    // First touch of the key creates the set.
                    let mut set = SortedSet::new();
                    set.add(&member, score);
                    self.store.insert(key, Object::Sorted(set));
                    Value::Int(1)
                }
            },

            Command::ZRem { key, member } => match self.store.get_mut(&key) {
                Some(Object::Sorted(set)) => Value::Int(i64::from(set.pop(&member).is_some())),
                Some(Object::Str(_)) => sorted_type_error(),
                None => Value::Int(0),
            },

            Command::ZScore { key, member } => match self.store.get_mut(&key) {
                Some(Object::Sorted(set)) => match set.score(&member) {
                    Some(score) => Value::Str(format_score(score)),
                    None => Value::Nil,
                },
                Some(Object::Str(_)) => sorted_type_error(),
                None => Value::Nil,
            },

            Command::ZQuery {
                key,
                score,
                member,
                offset,
                limit,
            } => match self.store.get_mut(&key) {
                Some(Object::Sorted(set)) => {
                    let mut out = Vec::new();
                    let mut cur = set
                        .lower_bound(score, &member)
                        .and_then(|id| set.offset(id, offset));
                    let mut remaining = limit.max(0);
                    while remaining > 0 {
                        let Some(id) = cur else { break };
                        let found = set.member(id);
                        out.push(Value::Str(Bytes::copy_from_slice(&found.name)));
                        out.push(Value::Str(format_score(found.score)));
                        remaining -= 1;
                        cur = set.offset(id, 1);
                    }
                    Value::Arr(out)
                }
                Some(Object::Str(_)) => sorted_type_error(),
                None => Value::Arr(Vec::new()),
            },
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn string_type_error() -> Value {
    Value::error(ERR_UNKNOWN, "value at key is not a string")
}

fn sorted_type_error() -> Value {
    Value::error(ERR_UNKNOWN, "value at key is not a sorted set")
}

fn format_score(score: f64) -> Bytes {
    Bytes::from(score.to_string().into_bytes())
}
