//! The node record itself (§3.2). Laid out as an arena entry: `parent`/
//! `left`/`right` are stable indices into the owning table's slab
//! rather than raw pointers, per the arena guidance in §9 ("model
//! nodes as arena-allocated entries indexed by stable indices").

use crate::prefix::Prefix;
use crate::table::NodeHandle;

/// A stable index into a table's slab. Encodes `(pool, slot)` as a
/// single integer; see `slab.rs`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeIndex(pub(crate) u32);

/// One trie node: either a leaf-with-payload (`info.is_some()`) or a
/// glue branch point (`info.is_none()`, both children present).
///
/// `T` is the opaque route/route-list payload (`info`); `A`/`O` are
/// the opaque adjacency-list head types (`adj_in`/`adj_out`), left
/// generic because the table never inspects them (§3.2).
pub(crate) struct Node<T, A = (), O = ()> {
    pub prefix: Prefix,
    pub parent: Option<NodeIndex>,
    pub left: Option<NodeIndex>,
    pub right: Option<NodeIndex>,
    pub lock: u32,
    pub info: Option<T>,
    pub adj_in: Option<A>,
    pub adj_out: Option<O>,
    pub on_wq: bool,
    /// Back-pointer to the enclosing MPLS-VPN route-distinguisher
    /// node, set once at creation (§3.2, §4.3 precondition). Holds a
    /// full lock on that node for as long as this one exists, rather
    /// than a bare index, since the referenced node may live in a
    /// different table.
    pub prn: Option<NodeHandle<T, A, O>>,
    /// Valid only while this slot sits on the slab's free-list.
    pub(crate) free_link: Option<NodeIndex>,
}

impl<T, A, O> Node<T, A, O> {
    /// A zeroed record, as handed out by `Slab::allocate` (§4.2: "the
    /// allocator... returns a zeroed record").
    pub(crate) fn empty(prefix: Prefix) -> Self {
        Node {
            prefix,
            parent: None,
            left: None,
            right: None,
            lock: 0,
            info: None,
            adj_in: None,
            adj_out: None,
            on_wq: false,
            prn: None,
            free_link: None,
        }
    }

    /// A glue node has no payload, no adjacency lists, and is not on a
    /// work queue (§3.4 clause 5's "no payload" half; whether it also
    /// has both children is a property of the tree shape, not this
    /// node alone, and is only enforced where it can actually be
    /// relied on — see `delete_node`'s two-children check).
    pub(crate) fn has_payload(&self) -> bool {
        self.info.is_some() || self.adj_in.is_some() || self.adj_out.is_some() || self.on_wq
    }

    pub(crate) fn child(&self, bit: u8) -> Option<NodeIndex> {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    pub(crate) fn set_child(&mut self, bit: u8, child: Option<NodeIndex>) {
        if bit == 0 {
            self.left = child;
        } else {
            self.right = child;
        }
    }
}
