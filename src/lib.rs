//! A reference-counted Patricia trie over variable-length IPv4/IPv6
//! prefixes, supporting exact and longest-prefix-match lookup,
//! insertion, deletion and in-order traversal.
//!
//! Grounded in Quagga/FRR's `bgpd/bgp_table.c`; see `DESIGN.md` for the
//! module-by-module mapping and the adaptations made to express it in
//! safe Rust (arena-indexed nodes, `Rc<RefCell<_>>` in place of manual
//! pointer reference counting, `Result`-returning invariant checks in
//! place of `qassert`).
//!
//! ```
//! use bgp_patricia_table::{Afi, Safi, Table};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let table: Table<&'static str> = Table::new(Afi::Ipv4, Safi::Unicast);
//! let route = inetnum::addr::Prefix::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8).unwrap();
//! let node = table.get(route, None);
//! node.set_info(Some("some-route"));
//!
//! let hit = table.match_ipv4(Ipv4Addr::new(10, 1, 2, 3)).unwrap();
//! assert_eq!(*hit.info(), Some("some-route"));
//! ```

mod afi;
mod check;
mod node;
mod prefix;
mod slab;
mod table;

pub use afi::{Afi, Safi, TableType};
pub use check::CheckError;
pub use prefix::{Family, Prefix, MAX_BYTES};
pub use table::{table_all_finish, table_finish, NodeHandle, Table, TableIter};
