//! In-memory storage: the hash index, the order-statistics tree, and the
//! sorted-set and keyspace types composed from them.

mod hash;
mod keyspace;
mod tree;
mod zset;

pub use hash::{hash_bytes, HashIndex};
pub use keyspace::{Object, Store};
pub use tree::{NodeId, OrderedTree};
pub use zset::{Member, SortedSet};
