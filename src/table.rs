//! The trie core, reference counting, iteration and table lifecycle
//! (§3.3, §4.3–§4.5, §4.7), grounded directly in `bgp_table.c`'s
//! `bgp_table_init`/`bgp_node_get`/`bgp_node_lookup`/`bgp_node_match`/
//! `bgp_unlock_node`/`bgp_node_delete`/`bgp_table_top`/`bgp_route_next`/
//! `bgp_table_free`.
//!
//! Nodes live in a per-table [`Slab`]; `parent`/`left`/`right` are
//! [`NodeIndex`] values rather than pointers (§9's arena guidance).
//! Multiple outstanding `table_lock`/`node_lock` handles are realized
//! as `Rc<RefCell<_>>` clones rather than raw refcounted pointers,
//! since this crate has no internal concurrency to protect against
//! (§5): a table is only ever driven by one task.

use std::cell::{Ref, RefCell, RefMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

use log::{log_enabled, trace, Level};

use crate::afi::{Afi, Safi, TableType};
use crate::check::{self, CheckError};
use crate::node::{Node, NodeIndex};
use crate::prefix::Prefix;
use crate::slab::Slab;

struct TableInner<T, A = (), O = ()> {
    top: Option<NodeIndex>,
    count: u64,
    lock: u32,
    afi: Afi,
    safi: Safi,
    table_type: TableType,
    owner_unlock: Option<Box<dyn FnOnce()>>,
    slab: Slab<T, A, O>,
}

impl<T, A, O> TableInner<T, A, O> {
    fn lock_node(&mut self, idx: NodeIndex) {
        self.slab.get_mut(idx).lock += 1;
    }

    /// `bgp_unlock_node`: decrement, and at zero enter `delete`.
    fn unlock_node(&mut self, idx: NodeIndex) {
        let remaining = {
            let node = self.slab.get_mut(idx);
            assert!(node.lock > 0, "node unlocked below zero");
            node.lock -= 1;
            node.lock
        };
        if remaining == 0 {
            self.delete_node(idx);
        }
    }

    /// `bgp_node_delete`: if this node is structurally required (two
    /// live children) it is left in place at lock==0 — tolerated
    /// because glue nodes have no external observers (§4.4, §9's open
    /// question). Otherwise splice it out and recurse into a
    /// now-stub parent.
    fn delete_node(&mut self, idx: NodeIndex) {
        let (left, right, parent, prefix) = {
            let node = self.slab.get(idx);
            debug_assert_eq!(node.lock, 0);
            debug_assert!(!node.has_payload());
            (node.left, node.right, node.parent, node.prefix)
        };

        if left.is_some() && right.is_some() {
            return;
        }
        let child = left.or(right);

        if log_enabled!(Level::Trace) {
            trace!("deleting node {prefix}");
        }

        if let Some(child_idx) = child {
            self.slab.get_mut(child_idx).parent = parent;
        }

        match parent {
            Some(parent_idx) => {
                let p = self.slab.get_mut(parent_idx);
                let bit = if p.left == Some(idx) { 0 } else { 1 };
                p.set_child(bit, child);
            }
            None => self.top = child,
        }

        self.count -= 1;
        self.slab.release(idx);

        if let Some(parent_idx) = parent {
            if self.slab.get(parent_idx).lock == 0 {
                self.delete_node(parent_idx);
            }
        }
    }

    fn link(slab: &mut Slab<T, A, O>, parent_idx: NodeIndex, child_idx: NodeIndex) {
        let parent_len = slab.get(parent_idx).prefix.len();
        let bit = slab.get(child_idx).prefix.bit_at(parent_len);
        slab.get_mut(child_idx).parent = Some(parent_idx);
        slab.get_mut(parent_idx).set_child(bit, Some(child_idx));
    }

    fn prn_matches(existing: &Option<NodeHandle<T, A, O>>, supplied: &Option<NodeHandle<T, A, O>>) -> bool {
        match (existing, supplied) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(&a.table, &b.table) && a.index == b.index,
            _ => false,
        }
    }

    /// `bgp_node_get`: find-or-insert, returning with one lock held.
    fn get_or_insert(&mut self, prefix: Prefix, prn: Option<NodeHandle<T, A, O>>) -> NodeIndex {
        if prn.is_some() {
            debug_assert_eq!(
                self.safi,
                Safi::MplsVpn,
                "prn supplied to a table that is not SAFI_MPLS_VPN"
            );
        }

        let mut match_idx: Option<NodeIndex> = None;
        let mut cur = self.top;

        while let Some(cur_idx) = cur {
            let node = self.slab.get(cur_idx);
            if node.prefix.len() > prefix.len() || !node.prefix.covers(&prefix) {
                break;
            }
            if node.prefix.len() == prefix.len() {
                debug_assert!(
                    Self::prn_matches(&node.prn, &prn),
                    "bgp_node_get: existing node's prn disagrees with the supplied one"
                );
                self.lock_node(cur_idx);
                return cur_idx;
            }
            match_idx = Some(cur_idx);
            let bit = prefix.bit_at(node.prefix.len());
            cur = node.child(bit);
        }

        let new_idx = match cur {
            // Attach as new leaf: the selected child slot (or `top`) is empty.
            None => {
                let idx = self.slab.allocate(prefix);
                match match_idx {
                    Some(m) => Self::link(&mut self.slab, m, idx),
                    None => self.top = Some(idx),
                }
                self.count += 1;
                idx
            }
            // Divergence: splice a glue node in place of `diverging_idx`.
            Some(diverging_idx) => {
                let diverging_prefix = self.slab.get(diverging_idx).prefix;
                let glue_prefix = Prefix::common_prefix(&diverging_prefix, &prefix);
                let glue_idx = self.slab.allocate(glue_prefix);

                if log_enabled!(Level::Trace) {
                    trace!("glue {glue_prefix} spliced above {diverging_prefix} for {prefix}");
                }

                Self::link(&mut self.slab, glue_idx, diverging_idx);
                match match_idx {
                    Some(m) => Self::link(&mut self.slab, m, glue_idx),
                    None => self.top = Some(glue_idx),
                }
                self.count += 1;

                if glue_prefix.len() == prefix.len() {
                    glue_idx
                } else {
                    let leaf_idx = self.slab.allocate(prefix);
                    Self::link(&mut self.slab, glue_idx, leaf_idx);
                    self.count += 1;
                    leaf_idx
                }
            }
        };

        self.slab.get_mut(new_idx).prn = prn;
        self.lock_node(new_idx);
        new_idx
    }

    /// `bgp_node_lookup`: exact match only, and only if `info` is set.
    fn lookup(&mut self, prefix: &Prefix) -> Option<NodeIndex> {
        let mut cur = self.top;
        while let Some(cur_idx) = cur {
            let node = self.slab.get(cur_idx);
            if node.prefix.len() > prefix.len() || !node.prefix.covers(prefix) {
                break;
            }
            if node.prefix.len() == prefix.len() {
                return if node.info.is_some() {
                    self.lock_node(cur_idx);
                    Some(cur_idx)
                } else {
                    None
                };
            }
            let bit = prefix.bit_at(node.prefix.len());
            cur = node.child(bit);
        }
        None
    }

    /// `bgp_node_match`: deepest covering node with `info` set.
    fn match_longest(&mut self, prefix: &Prefix) -> Option<NodeIndex> {
        let mut best = None;
        let mut cur = self.top;
        while let Some(cur_idx) = cur {
            let node = self.slab.get(cur_idx);
            if node.prefix.len() > prefix.len() || !node.prefix.covers(prefix) {
                break;
            }
            if node.info.is_some() {
                best = Some(cur_idx);
            }
            let bit = prefix.bit_at(node.prefix.len());
            cur = node.child(bit);
        }
        if let Some(b) = best {
            self.lock_node(b);
        }
        best
    }

    /// `bgp_table_top`.
    fn first(&mut self) -> Option<NodeIndex> {
        let top = self.top?;
        #[cfg(debug_assertions)]
        if let Err(e) = check::check(&self.slab, self.top, self.count) {
            panic!("routing table invariant violated: {e}");
        }
        self.lock_node(top);
        Some(top)
    }

    /// Pure pre-order successor lookup; does not touch any lock. Used
    /// by both `NodeHandle::next`/`next_until` and the `Iterator`
    /// adapter (§4.5).
    fn compute_next(&self, idx: NodeIndex, limit: Option<NodeIndex>) -> Option<NodeIndex> {
        let node = self.slab.get(idx);
        if let Some(l) = node.left {
            return Some(l);
        }
        if let Some(r) = node.right {
            return Some(r);
        }

        let mut cur = idx;
        loop {
            if Some(cur) == limit {
                return None;
            }
            let parent_idx = self.slab.get(cur).parent?;
            let parent = self.slab.get(parent_idx);
            if parent.left == Some(cur) && parent.right.is_some() {
                return parent.right;
            }
            cur = parent_idx;
        }
    }

    /// `bgp_table_free`: unconditional bulk teardown. Precondition
    /// (asserted): no collaborator still references a node.
    fn bulk_free(&mut self) {
        fn walk<T, A, O>(slab: &mut Slab<T, A, O>, idx: NodeIndex) {
            let (left, right) = {
                let n = slab.get(idx);
                (n.left, n.right)
            };
            if let Some(l) = left {
                walk(slab, l);
            }
            if let Some(r) = right {
                walk(slab, r);
            }
            {
                let n = slab.get(idx);
                debug_assert!(
                    n.info.is_none() && n.adj_in.is_none() && n.adj_out.is_none() && !n.on_wq,
                    "node still referenced by a collaborator at table teardown"
                );
            }
            slab.release(idx);
        }

        if let Some(top) = self.top.take() {
            walk(&mut self.slab, top);
        }
        self.count = 0;
        self.slab.shutdown();

        if let Some(unlock) = self.owner_unlock.take() {
            unlock();
        }
    }
}

/// A reference-counted Patricia trie over variable-length IP prefixes
/// (§3.3). `T` is the opaque route/route-list payload; `A`/`O` are the
/// opaque adjacency-list head types, left generic because the table
/// never inspects them.
///
/// Cloning a `Table` is `table_lock`; dropping the last clone is
/// `table_unlock` reaching zero, which runs the unconditional bulk
/// free of §4.7.
pub struct Table<T, A = (), O = ()>(Rc<RefCell<TableInner<T, A, O>>>);

impl<T, A, O> Table<T, A, O> {
    /// `table_init`: returns with one outstanding lock (the returned
    /// value itself).
    pub fn new(afi: Afi, safi: Safi) -> Self {
        log::debug!("table initialised afi={afi:?} safi={safi:?}");
        Table(Rc::new(RefCell::new(TableInner {
            top: None,
            count: 0,
            lock: 1,
            afi,
            safi,
            table_type: TableType::Main,
            owner_unlock: None,
            slab: Slab::new(),
        })))
    }

    pub fn afi(&self) -> Afi {
        self.0.borrow().afi
    }

    pub fn safi(&self) -> Safi {
        self.0.borrow().safi
    }

    pub fn table_type(&self) -> TableType {
        self.0.borrow().table_type
    }

    pub fn count(&self) -> u64 {
        self.0.borrow().count
    }

    /// `table_lock`.
    pub fn lock(&self) -> Self {
        self.0.borrow_mut().lock += 1;
        Table(Rc::clone(&self.0))
    }

    /// Register the one-shot hook run when this table's lock reaches
    /// zero (§3.3's `owner` back-reference, §4.7's "if owner is set,
    /// unlock it"). Peer lifetime is an external collaborator's
    /// concern, so the table only holds the release hook, not the
    /// peer itself.
    pub fn set_owner(&self, unlock: impl FnOnce() + 'static) {
        self.0.borrow_mut().owner_unlock = Some(Box::new(unlock));
    }

    /// `bgp_node_get`.
    pub fn get(&self, prefix: impl Into<Prefix>, prn: Option<NodeHandle<T, A, O>>) -> NodeHandle<T, A, O> {
        let idx = self.0.borrow_mut().get_or_insert(prefix.into(), prn);
        NodeHandle { table: Rc::clone(&self.0), index: idx }
    }

    /// `bgp_node_lookup`.
    pub fn lookup(&self, prefix: impl Into<Prefix>) -> Option<NodeHandle<T, A, O>> {
        let idx = self.0.borrow_mut().lookup(&prefix.into())?;
        Some(NodeHandle { table: Rc::clone(&self.0), index: idx })
    }

    /// `bgp_node_match`.
    pub fn match_prefix(&self, prefix: impl Into<Prefix>) -> Option<NodeHandle<T, A, O>> {
        let idx = self.0.borrow_mut().match_longest(&prefix.into())?;
        Some(NodeHandle { table: Rc::clone(&self.0), index: idx })
    }

    /// `bgp_node_match_ipv4`.
    pub fn match_ipv4(&self, addr: Ipv4Addr) -> Option<NodeHandle<T, A, O>> {
        self.match_prefix(Prefix::host(IpAddr::V4(addr)))
    }

    /// `bgp_node_match_ipv6`.
    pub fn match_ipv6(&self, addr: Ipv6Addr) -> Option<NodeHandle<T, A, O>> {
        self.match_prefix(Prefix::host(IpAddr::V6(addr)))
    }

    /// `bgp_table_top`.
    pub fn first(&self) -> Option<NodeHandle<T, A, O>> {
        let idx = self.0.borrow_mut().first()?;
        Some(NodeHandle { table: Rc::clone(&self.0), index: idx })
    }

    /// A safe `Iterator` built on `first`/`NodeHandle::next`. Unlike
    /// the raw cursor API, each step holds an extra lock on the item
    /// handed to the caller (so it survives past the following
    /// `.next()` call) in addition to the one the internal cursor
    /// keeps — see the doc comment on [`TableIter`].
    pub fn iter(&self) -> TableIter<T, A, O> {
        TableIter { cursor: self.first() }
    }

    /// `bgp_table_check` / `bgp_table_node_check`, reported rather
    /// than asserted (§4.6, SPEC_FULL.md §7).
    pub fn check(&self) -> Result<(), CheckError> {
        let inner = self.0.borrow();
        check::check(&inner.slab, inner.top, inner.count)
    }
}

impl<T, A, O> Clone for Table<T, A, O> {
    fn clone(&self) -> Self {
        self.lock()
    }
}

impl<T, A, O> Drop for Table<T, A, O> {
    fn drop(&mut self) {
        let should_free = {
            let mut inner = self.0.borrow_mut();
            assert!(inner.lock > 0, "table unlocked below zero");
            inner.lock -= 1;
            inner.lock == 0
        };
        if should_free {
            self.0.borrow_mut().bulk_free();
        }
    }
}

/// `table_finish`: drop the caller's handle and null it out. Plain
/// `drop(table)` does the same thing; this free function exists so
/// every name in §6's interface list has a literal counterpart.
pub fn table_finish<T, A, O>(table: &mut Option<Table<T, A, O>>) {
    *table = None;
}

/// `bgp_table_all_finish`: the original's process-exit hook that frees
/// the global node pool. With a per-table slab (see DESIGN.md) there
/// is no process-wide pool left once every `Table` has dropped its
/// own, so this is a documented no-op kept for interface parity.
pub fn table_all_finish() {}

/// A locked handle to one [`Node`]. Cloning is `node_lock`; dropping is
/// `node_unlock`, and the final drop runs the delete-and-collapse path
/// of §4.4.
pub struct NodeHandle<T, A = (), O = ()> {
    table: Rc<RefCell<TableInner<T, A, O>>>,
    index: NodeIndex,
}

impl<T, A, O> NodeHandle<T, A, O> {
    pub fn prefix(&self) -> Prefix {
        self.table.borrow().slab.get(self.index).prefix
    }

    pub fn info(&self) -> Ref<'_, Option<T>> {
        Ref::map(self.table.borrow(), |inner| &inner.slab.get(self.index).info)
    }

    pub fn info_mut(&self) -> RefMut<'_, Option<T>> {
        RefMut::map(self.table.borrow_mut(), |inner| &mut inner.slab.get_mut(self.index).info)
    }

    pub fn set_info(&self, info: Option<T>) {
        self.table.borrow_mut().slab.get_mut(self.index).info = info;
    }

    pub fn adj_in(&self) -> Ref<'_, Option<A>> {
        Ref::map(self.table.borrow(), |inner| &inner.slab.get(self.index).adj_in)
    }

    pub fn set_adj_in(&self, adj_in: Option<A>) {
        self.table.borrow_mut().slab.get_mut(self.index).adj_in = adj_in;
    }

    pub fn adj_out(&self) -> Ref<'_, Option<O>> {
        Ref::map(self.table.borrow(), |inner| &inner.slab.get(self.index).adj_out)
    }

    pub fn set_adj_out(&self, adj_out: Option<O>) {
        self.table.borrow_mut().slab.get_mut(self.index).adj_out = adj_out;
    }

    pub fn on_work_queue(&self) -> bool {
        self.table.borrow().slab.get(self.index).on_wq
    }

    pub fn set_on_work_queue(&self, on_wq: bool) {
        self.table.borrow_mut().slab.get_mut(self.index).on_wq = on_wq;
    }

    /// The enclosing MPLS-VPN route-distinguisher node, if any (§3.2).
    /// `prn` may live in a different table than the node it is attached
    /// to, so the returned handle is cloned from the stored one rather
    /// than re-derived against `self`'s own table.
    pub fn prn(&self) -> Option<NodeHandle<T, A, O>> {
        let stored = {
            let inner = self.table.borrow();
            inner.slab.get(self.index).prn.as_ref().map(|h| (Rc::clone(&h.table), h.index))
        };
        stored.map(|(table, index)| {
            table.borrow_mut().lock_node(index);
            NodeHandle { table, index }
        })
    }

    /// `bgp_lock_node`.
    pub fn lock(&self) -> Self {
        self.clone()
    }

    /// `bgp_unlock_node`. Equivalent to `drop(handle)`; kept as an
    /// explicit, self-documenting call site.
    pub fn unlock(self) {
        drop(self);
    }

    /// `bgp_route_next`.
    pub fn next(self) -> Option<Self> {
        let next_idx = {
            let inner = self.table.borrow();
            inner.compute_next(self.index, None)
        };
        next_idx.map(|idx| {
            self.table.borrow_mut().lock_node(idx);
            NodeHandle { table: Rc::clone(&self.table), index: idx }
        })
    }

    /// `bgp_route_next_until`.
    pub fn next_until(self, limit: &NodeHandle<T, A, O>) -> Option<Self> {
        let next_idx = {
            let inner = self.table.borrow();
            inner.compute_next(self.index, Some(limit.index))
        };
        next_idx.map(|idx| {
            self.table.borrow_mut().lock_node(idx);
            NodeHandle { table: Rc::clone(&self.table), index: idx }
        })
    }
}

impl<T, A, O> Clone for NodeHandle<T, A, O> {
    fn clone(&self) -> Self {
        self.table.borrow_mut().lock_node(self.index);
        NodeHandle { table: Rc::clone(&self.table), index: self.index }
    }
}

impl<T, A, O> Drop for NodeHandle<T, A, O> {
    fn drop(&mut self) {
        self.table.borrow_mut().unlock_node(self.index);
    }
}

impl<T, A, O> std::fmt::Debug for NodeHandle<T, A, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("prefix", &self.prefix()).finish()
    }
}

/// A pre-order `Iterator` over a table's nodes, built on the raw
/// cursor in [`NodeHandle::next`]. Each step additionally clones the
/// item about to be returned so it outlives the following `.next()`
/// call, which is what a caller holding onto loop-body state expects;
/// the raw `NodeHandle::next`/`next_until` pair remains the
/// single-outstanding-lock primitive described in §4.5.
pub struct TableIter<T, A = (), O = ()> {
    cursor: Option<NodeHandle<T, A, O>>,
}

impl<T, A, O> Iterator for TableIter<T, A, O> {
    type Item = NodeHandle<T, A, O>;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cursor.take()?;
        let to_return = cur.clone();
        self.cursor = cur.next();
        Some(to_return)
    }
}
