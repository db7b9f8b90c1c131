use std::cmp::Ordering;

use super::hash::{hash_bytes, HashIndex};
use super::tree::{NodeId, OrderedTree};

/// One sorted-set member. Stored once, in the tree arena; the name index
/// refers to it by node id.
pub struct Member {
    pub score: f64,
    pub name: Vec<u8>,
}

/// Sorted set: a name index composed with an order-statistics tree.
///
/// The hash side answers "does this name exist, and at what score" in
/// O(1) expected; the tree side keeps members ordered by (score, name)
/// for range and rank queries. Every member is linked into both at once;
/// removal unlinks the hash entry first (yielding the node id) and then
/// the tree node (yielding the member), so storage is only released after
/// both unlinks.
pub struct SortedSet {
    tree: OrderedTree<Member>,
    index: HashIndex<NodeId>,
}

/// Strict order on (score, name): score first, name as tiebreak.
/// `total_cmp` keeps the relation total even for NaN inputs.
fn precedes(member: &Member, score: f64, name: &[u8]) -> bool {
    match member.score.total_cmp(&score) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => member.name.as_slice() < name,
    }
}

fn member_less(a: &Member, b: &Member) -> bool {
    precedes(a, b.score, &b.name)
}

impl SortedSet {
    pub fn new() -> Self {
        Self {
            tree: OrderedTree::new(),
            index: HashIndex::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Insert a member, or update an existing member's score in place.
    ///
    /// Returns true when a new member was created. A score change detaches
    /// the node and re-attaches it under its new ordering key; the node id
    /// is stable across the move, so the name index needs no work.
    pub fn add(&mut self, name: &[u8], score: f64) -> bool {
        let hash = hash_bytes(name);
        let tree = &self.tree;
        let existing = self
            .index
            .get(hash, |&id| tree.item(id).name == name)
            .copied();
        match existing {
            Some(id) => {
                if self.tree.item(id).score != score {
                    self.tree.detach(id);
                    self.tree.item_mut(id).score = score;
                    self.tree.attach_by(id, member_less);
                }
                false
            }
            None => {
                let id = self.tree.insert_by(
                    Member {
                        score,
                        name: name.to_vec(),
                    },
                    member_less,
                );
                self.index.insert(hash, id);
                true
            }
        }
    }

    /// Score of the named member, if present.
    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        let tree = &self.tree;
        self.index
            .get(hash_bytes(name), |&id| tree.item(id).name == name)
            .map(|&id| tree.item(id).score)
    }

    /// Remove the named member, returning it.
    pub fn pop(&mut self, name: &[u8]) -> Option<Member> {
        let tree = &self.tree;
        let id = self
            .index
            .remove(hash_bytes(name), |&id| tree.item(id).name == name)?;
        Some(self.tree.remove(id))
    }

    /// First member whose (score, name) is greater than or equal to the
    /// given pair: a lower-bound descent through the tree.
    pub fn lower_bound(&self, score: f64, name: &[u8]) -> Option<NodeId> {
        self.tree.first_ge_by(|m| !precedes(m, score, name))
    }

    /// Rank-relative navigation from a known member node.
    pub fn offset(&self, id: NodeId, delta: i64) -> Option<NodeId> {
        self.tree.offset(id, delta)
    }

    pub fn member(&self, id: NodeId) -> &Member {
        self.tree.item(id)
    }
}

impl Default for SortedSet {
    fn default() -> Self {
        Self::new()
    }
}
