//! Debug-only structural invariant checker (§4.6), grounded in
//! `bgp_table_check`/`bgp_table_node_check` from `bgp_table.c`. Unlike
//! the original's `qassert`-and-abort, this reports which clause of
//! §3.4 failed as a `Result`, so it is usable from tests without
//! tearing down the process (see SPEC_FULL.md §7).

use crate::node::NodeIndex;
use crate::prefix::Prefix;
use crate::slab::Slab;

/// Which of §3.4's invariants was violated, and on what prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// Clause 1: a child's prefix length did not strictly exceed its
    /// parent's.
    LengthNotIncreasing { parent: Prefix, child: Prefix },
    /// Clause 2: a child's prefix was not covered by its parent's.
    CoverageBroken { parent: Prefix, child: Prefix },
    /// Clause 3: a child hung off the wrong bit slot.
    BitMismatch { parent: Prefix, child: Prefix, slot: u8 },
    /// Clause 4: a child's `parent` link did not point back.
    ParentLinkBroken { child: Prefix },
    /// Clause 7/8: a stored prefix had nonzero bits beyond its length.
    NonCanonicalPrefix(Prefix),
    /// Clause 6: `table.count` did not match the reachable node count.
    CountMismatch { expected: u64, reachable: u64 },
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckError::LengthNotIncreasing { parent, child } => write!(
                f,
                "child {child} does not have a strictly longer prefix than parent {parent}"
            ),
            CheckError::CoverageBroken { parent, child } => {
                write!(f, "parent {parent} does not cover child {child}")
            }
            CheckError::BitMismatch { parent, child, slot } => write!(
                f,
                "child {child} hangs off bit slot {slot} of {parent} but its bit disagrees"
            ),
            CheckError::ParentLinkBroken { child } => {
                write!(f, "node {child}'s parent link does not point back to it")
            }
            CheckError::NonCanonicalPrefix(p) => {
                write!(f, "prefix {p} has nonzero bits beyond its length")
            }
            CheckError::CountMismatch { expected, reachable } => write!(
                f,
                "table.count is {expected} but {reachable} nodes are reachable from top"
            ),
        }
    }
}

impl std::error::Error for CheckError {}

pub(crate) fn check<T, A, O>(
    slab: &Slab<T, A, O>,
    top: Option<NodeIndex>,
    count: u64,
) -> Result<(), CheckError> {
    let mut reachable = 0u64;
    if let Some(top) = top {
        walk(slab, top, &mut reachable)?;
    }
    if reachable != count {
        return Err(CheckError::CountMismatch { expected: count, reachable });
    }
    Ok(())
}

fn walk<T, A, O>(
    slab: &Slab<T, A, O>,
    idx: NodeIndex,
    reachable: &mut u64,
) -> Result<(), CheckError> {
    let node = slab.get(idx);
    *reachable += 1;

    if !node.prefix.is_canonical() {
        return Err(CheckError::NonCanonicalPrefix(node.prefix));
    }

    for bit in [0u8, 1u8] {
        if let Some(child_idx) = node.child(bit) {
            let child = slab.get(child_idx);
            if child.parent != Some(idx) {
                return Err(CheckError::ParentLinkBroken { child: child.prefix });
            }
            if child.prefix.len() <= node.prefix.len() {
                return Err(CheckError::LengthNotIncreasing {
                    parent: node.prefix,
                    child: child.prefix,
                });
            }
            if !node.prefix.covers(&child.prefix) {
                return Err(CheckError::CoverageBroken {
                    parent: node.prefix,
                    child: child.prefix,
                });
            }
            if child.prefix.bit_at(node.prefix.len()) != bit {
                return Err(CheckError::BitMismatch {
                    parent: node.prefix,
                    child: child.prefix,
                    slot: bit,
                });
            }
            walk(slab, child_idx, reachable)?;
        }
    }

    Ok(())
}
