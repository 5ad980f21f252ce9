//! Fixed-size node-record pool (§4.2). Grounded directly in
//! `bgp_table.c`'s `rn_pool`/`bgp_node_calloc`/`bgp_node_free`: grow by
//! appending a pool of `POOL_SIZE` records, hand records out from a
//! free-list threaded through the records themselves, zero on
//! allocate, no-op on release.
//!
//! Adapted per the Design Notes' "global slab" tradeoff (§9, option
//! c): the pool lives inside the owning `Table` rather than behind a
//! process-wide static, so there is no lock and no process-exit hook
//! required for correctness (see DESIGN.md).

use crate::node::{Node, NodeIndex};
use crate::prefix::Prefix;

const POOL_SIZE: usize = 1024;

pub(crate) struct Slab<T, A = (), O = ()> {
    pools: Vec<Vec<Node<T, A, O>>>,
    free_head: Option<NodeIndex>,
    live: usize,
}

impl<T, A, O> Slab<T, A, O> {
    pub(crate) fn new() -> Self {
        Slab { pools: Vec::new(), free_head: None, live: 0 }
    }

    fn index_of(pool: usize, slot: usize) -> NodeIndex {
        NodeIndex((pool * POOL_SIZE + slot) as u32)
    }

    fn locate(idx: NodeIndex) -> (usize, usize) {
        let i = idx.0 as usize;
        (i / POOL_SIZE, i % POOL_SIZE)
    }

    fn grow(&mut self) {
        let pool_no = self.pools.len();
        let mut pool = Vec::with_capacity(POOL_SIZE);
        for slot in 0..POOL_SIZE {
            let mut rec = Node::empty(Prefix::default_route(crate::prefix::Family::Ipv4));
            let next = if slot + 1 < POOL_SIZE {
                Some(Self::index_of(pool_no, slot + 1))
            } else {
                self.free_head
            };
            rec.free_link = next;
            pool.push(rec);
        }
        self.free_head = Some(Self::index_of(pool_no, 0));
        self.pools.push(pool);
    }

    /// Hand out a zeroed record holding `prefix`, amortized O(1).
    pub(crate) fn allocate(&mut self, prefix: Prefix) -> NodeIndex {
        if self.free_head.is_none() {
            self.grow();
        }
        let idx = self.free_head.expect("grow() always populates free_head");
        let (pool, slot) = Self::locate(idx);
        let next_free = self.pools[pool][slot].free_link;
        self.pools[pool][slot] = Node::empty(prefix);
        self.free_head = next_free;
        self.live += 1;
        idx
    }

    /// Return a record to the free-list. No zeroing needed; `allocate`
    /// zeroes on hand-out.
    pub(crate) fn release(&mut self, idx: NodeIndex) {
        let (pool, slot) = Self::locate(idx);
        self.pools[pool][slot].free_link = self.free_head;
        self.free_head = Some(idx);
        self.live -= 1;
    }

    pub(crate) fn get(&self, idx: NodeIndex) -> &Node<T, A, O> {
        let (pool, slot) = Self::locate(idx);
        &self.pools[pool][slot]
    }

    pub(crate) fn get_mut(&mut self, idx: NodeIndex) -> &mut Node<T, A, O> {
        let (pool, slot) = Self::locate(idx);
        &mut self.pools[pool][slot]
    }

    /// Free every pool and clear the free-list. After this, no node
    /// index from this slab may be dereferenced (caller responsibility,
    /// mirroring `bgp_table_all_finish`'s contract).
    pub(crate) fn shutdown(&mut self) {
        self.pools.clear();
        self.free_head = None;
        self.live = 0;
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.live
    }
}
