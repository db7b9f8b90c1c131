/// Stable arena index of a tree node.
///
/// Node references are indices into the arena, never pointers, so
/// rebalancing rewires integers and a stale id can at worst hit a vacant
/// slot check instead of freed memory.
pub type NodeId = u32;

struct Node<T> {
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    /// Height of the subtree rooted here, 1 for a leaf.
    depth: u32,
    /// Number of nodes in the subtree rooted here, including self.
    count: u32,
    item: T,
}

enum Slot<T> {
    Occupied(Node<T>),
    Vacant(Option<NodeId>),
}

/// Order-statistics AVL tree.
///
/// Every node caches its subtree height and size; the size augmentation is
/// what makes rank-relative navigation (`offset`) logarithmic. The ordering
/// relation is supplied by the caller at insertion and search time, so the
/// tree itself only knows links and cached fields.
pub struct OrderedTree<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<NodeId>,
    root: Option<NodeId>,
}

impl<T> OrderedTree<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            root: None,
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.count_of(self.root) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn item(&self, id: NodeId) -> &T {
        &self.node(id).item
    }

    pub fn item_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id).item
    }

    /// Allocate a node for `item` and link it in under the caller's order.
    ///
    /// Equal items go to the right, so insertion order is preserved among
    /// duplicates.
    pub fn insert_by<F>(&mut self, item: T, less: F) -> NodeId
    where
        F: FnMut(&T, &T) -> bool,
    {
        let id = self.alloc(item);
        self.attach_by(id, less);
        id
    }

    /// Link an already-allocated, detached node back into the tree.
    ///
    /// Used when a node's ordering key changed: the node id stays stable,
    /// so references held outside the tree (the sorted-set name index)
    /// remain valid across the move.
    pub fn attach_by<F>(&mut self, id: NodeId, mut less: F)
    where
        F: FnMut(&T, &T) -> bool,
    {
        let Some(mut cur) = self.root else {
            self.root = Some(id);
            return;
        };
        loop {
            let go_left = less(self.item(id), self.item(cur));
            let next = if go_left {
                self.node(cur).left
            } else {
                self.node(cur).right
            };
            match next {
                Some(n) => cur = n,
                None => {
                    if go_left {
                        self.node_mut(cur).left = Some(id);
                    } else {
                        self.node_mut(cur).right = Some(id);
                    }
                    self.node_mut(id).parent = Some(cur);
                    self.root = Some(self.fix(id));
                    return;
                }
            }
        }
    }

    /// Unlink `id` from the tree and release its slot, returning the item.
    pub fn remove(&mut self, id: NodeId) -> T {
        self.detach(id);
        self.dealloc(id)
    }

    /// Unlink `id` from the tree, keeping its slot allocated.
    ///
    /// The node comes out with fresh link fields, ready for `attach_by`.
    pub fn detach(&mut self, id: NodeId) {
        match self.node(id).right {
            None => {
                // No right subtree: the left child takes this node's place.
                let parent = self.node(id).parent;
                let left = self.node(id).left;
                if let Some(l) = left {
                    self.node_mut(l).parent = parent;
                }
                match parent {
                    Some(p) => {
                        self.replace_child(p, id, left);
                        self.root = Some(self.fix(p));
                    }
                    None => self.root = left,
                }
            }
            Some(right) => {
                // Replace with the in-order successor: the leftmost node of
                // the right subtree. Detach the successor first, then let it
                // take over this node's links and cached fields.
                let mut victim = right;
                while let Some(l) = self.node(victim).left {
                    victim = l;
                }
                self.detach(victim);
                // Re-read the links: the successor's removal may have
                // rebalanced ancestors, including this node.
                let (left, right, parent, depth, count) = {
                    let n = self.node(id);
                    (n.left, n.right, n.parent, n.depth, n.count)
                };
                {
                    let v = self.node_mut(victim);
                    v.left = left;
                    v.right = right;
                    v.parent = parent;
                    v.depth = depth;
                    v.count = count;
                }
                if let Some(l) = left {
                    self.node_mut(l).parent = Some(victim);
                }
                if let Some(r) = right {
                    self.node_mut(r).parent = Some(victim);
                }
                match parent {
                    Some(p) => self.replace_child(p, id, Some(victim)),
                    None => self.root = Some(victim),
                }
            }
        }
        let n = self.node_mut(id);
        n.left = None;
        n.right = None;
        n.parent = None;
        n.depth = 1;
        n.count = 1;
    }

    /// Walk `offset` positions in sorted order from `start`.
    ///
    /// Negative offsets walk toward smaller items. Returns `None` when the
    /// target rank falls outside the tree. Worst case O(log n): the walk
    /// climbs while the target is outside the current subtree's reach and
    /// descends consuming subtree counts.
    pub fn offset(&self, start: NodeId, offset: i64) -> Option<NodeId> {
        let mut id = start;
        // Rank of `id` relative to `start`.
        let mut pos: i64 = 0;
        while pos != offset {
            let right = self.node(id).right;
            let left = self.node(id).left;
            if pos < offset && pos + self.count_of(right) as i64 >= offset {
                // Target is inside the right subtree.
                id = self.expect_child(right);
                pos += self.count_of(self.node(id).left) as i64 + 1;
            } else if pos > offset && pos - self.count_of(left) as i64 <= offset {
                // Target is inside the left subtree.
                id = self.expect_child(left);
                pos -= self.count_of(self.node(id).right) as i64 + 1;
            } else {
                let parent = self.node(id).parent?;
                if self.node(parent).right == Some(id) {
                    pos -= self.count_of(self.node(id).left) as i64 + 1;
                } else {
                    pos += self.count_of(self.node(id).right) as i64 + 1;
                }
                id = parent;
            }
        }
        Some(id)
    }

    /// First node (in sorted order) for which `ge` holds, i.e. a lower
    /// bound under the caller's order. `ge` must be monotone: false for a
    /// prefix of the sorted sequence, true for the rest.
    pub fn first_ge_by<F>(&self, mut ge: F) -> Option<NodeId>
    where
        F: FnMut(&T) -> bool,
    {
        let mut found = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            if ge(self.item(id)) {
                found = Some(id);
                cur = self.node(id).left;
            } else {
                cur = self.node(id).right;
            }
        }
        found
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        match &self.slots[id as usize] {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => unreachable!("vacant tree slot {id}"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match &mut self.slots[id as usize] {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => unreachable!("vacant tree slot {id}"),
        }
    }

    fn expect_child(&self, id: Option<NodeId>) -> NodeId {
        match id {
            Some(n) => n,
            None => unreachable!("subtree counts point into an empty child"),
        }
    }

    fn depth_of(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |i| self.node(i).depth)
    }

    fn count_of(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |i| self.node(i).count)
    }

    fn update(&mut self, id: NodeId) {
        let (l, r) = {
            let n = self.node(id);
            (n.left, n.right)
        };
        let depth = 1 + self.depth_of(l).max(self.depth_of(r));
        let count = 1 + self.count_of(l) + self.count_of(r);
        let n = self.node_mut(id);
        n.depth = depth;
        n.count = count;
    }

    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: Option<NodeId>) {
        let p = self.node_mut(parent);
        if p.left == Some(old) {
            p.left = new;
        } else {
            p.right = new;
        }
    }

    /// Recompute cached fields and rebalance from `id` up to the root.
    ///
    /// A rotation at one level can change the balance of every ancestor,
    /// so the walk always continues to the root. Returns the root.
    fn fix(&mut self, mut id: NodeId) -> NodeId {
        loop {
            self.update(id);
            let l = self.depth_of(self.node(id).left);
            let r = self.depth_of(self.node(id).right);
            let parent = self.node(id).parent;
            let from_left = parent.map(|p| self.node(p).left == Some(id));
            let sub = if l == r + 2 {
                self.fix_left(id)
            } else if l + 2 == r {
                self.fix_right(id)
            } else {
                id
            };
            match parent {
                None => return sub,
                Some(p) => {
                    if from_left == Some(true) {
                        self.node_mut(p).left = Some(sub);
                    } else {
                        self.node_mut(p).right = Some(sub);
                    }
                    id = p;
                }
            }
        }
    }

    /// Left subtree is two levels deeper: rotate right, first straightening
    /// a right-heavy left child so the single rotation lands balanced.
    fn fix_left(&mut self, id: NodeId) -> NodeId {
        let left = self.expect_child(self.node(id).left);
        if self.depth_of(self.node(left).left) < self.depth_of(self.node(left).right) {
            let new_left = self.rot_left(left);
            self.node_mut(id).left = Some(new_left);
        }
        self.rot_right(id)
    }

    fn fix_right(&mut self, id: NodeId) -> NodeId {
        let right = self.expect_child(self.node(id).right);
        if self.depth_of(self.node(right).right) < self.depth_of(self.node(right).left) {
            let new_right = self.rot_right(right);
            self.node_mut(id).right = Some(new_right);
        }
        self.rot_left(id)
    }

    /// Rotate `id`'s right child above it. The caller reattaches the
    /// returned subtree root to `id`'s former parent.
    fn rot_left(&mut self, id: NodeId) -> NodeId {
        let new_top = self.expect_child(self.node(id).right);
        let inner = self.node(new_top).left;
        let parent = self.node(id).parent;
        if let Some(i) = inner {
            self.node_mut(i).parent = Some(id);
        }
        self.node_mut(id).right = inner;
        self.node_mut(new_top).left = Some(id);
        self.node_mut(new_top).parent = parent;
        self.node_mut(id).parent = Some(new_top);
        self.update(id);
        self.update(new_top);
        new_top
    }

    fn rot_right(&mut self, id: NodeId) -> NodeId {
        let new_top = self.expect_child(self.node(id).left);
        let inner = self.node(new_top).right;
        let parent = self.node(id).parent;
        if let Some(i) = inner {
            self.node_mut(i).parent = Some(id);
        }
        self.node_mut(id).left = inner;
        self.node_mut(new_top).right = Some(id);
        self.node_mut(new_top).parent = parent;
        self.node_mut(id).parent = Some(new_top);
        self.update(id);
        self.update(new_top);
        new_top
    }

    fn alloc(&mut self, item: T) -> NodeId {
        let node = Node {
            left: None,
            right: None,
            parent: None,
            depth: 1,
            count: 1,
            item,
        };
        match self.free_head {
            Some(id) => {
                self.free_head = match &self.slots[id as usize] {
                    Slot::Vacant(next) => *next,
                    Slot::Occupied(_) => unreachable!("occupied slot on the free list"),
                };
                self.slots[id as usize] = Slot::Occupied(node);
                id
            }
            None => {
                let id = self.slots.len() as NodeId;
                self.slots.push(Slot::Occupied(node));
                id
            }
        }
    }

    fn dealloc(&mut self, id: NodeId) -> T {
        let slot = std::mem::replace(&mut self.slots[id as usize], Slot::Vacant(self.free_head));
        self.free_head = Some(id);
        match slot {
            Slot::Occupied(n) => n.item,
            Slot::Vacant(_) => unreachable!("double free of tree slot {id}"),
        }
    }
}

impl<T> Default for OrderedTree<T> {
    fn default() -> Self {
        Self::new()
    }
}
