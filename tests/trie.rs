//! End-to-end scenarios over the public `Table` API: the glue-node
//! lifecycle, longest-prefix-match tie-breaking, and iteration
//! stability under concurrent deletion (§8).

use std::net::{IpAddr, Ipv4Addr};

use bgp_patricia_table::{Afi, Safi, Table};
use inetnum::addr::Prefix;
use rand::Rng;

mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

fn v4(addr: [u8; 4], len: u8) -> Prefix {
    Prefix::new(IpAddr::V4(Ipv4Addr::from(addr)), len).unwrap()
}

#[test]
fn lookup_on_empty_table_finds_nothing() {
    common::init();
    let table: Table<u32> = Table::new(Afi::Ipv4, Safi::Unicast);
    assert!(table.lookup(v4([10, 0, 0, 0], 8)).is_none());
    assert!(table.match_ipv4(Ipv4Addr::new(10, 0, 0, 1)).is_none());
    assert_eq!(table.count(), 0);
}

#[test]
fn single_route_is_exact_and_longest_prefix_reachable() {
    common::init();
    let table: Table<u32> = Table::new(Afi::Ipv4, Safi::Unicast);
    let node = table.get(v4([10, 0, 0, 0], 8), None);
    node.set_info(Some(100));
    drop(node);

    let exact = table.lookup(v4([10, 0, 0, 0], 8)).expect("exact hit");
    assert_eq!(*exact.info(), Some(100));

    let lpm = table.match_ipv4(Ipv4Addr::new(10, 1, 2, 3)).expect("lpm hit");
    assert_eq!(*lpm.info(), Some(100));

    assert!(table.lookup(v4([10, 1, 0, 0], 16)).is_none());
}

#[test]
fn divergent_insert_creates_a_glue_node() {
    common::init();
    let table: Table<u32> = Table::new(Afi::Ipv4, Safi::Unicast);
    table.get(v4([10, 0, 0, 0], 8), None).set_info(Some(1));
    table.get(v4([11, 0, 0, 0], 8), None).set_info(Some(2));

    // Neither route is a prefix of the other, so a payload-free glue
    // node (10.0.0.0/7) must now sit above both.
    assert_eq!(table.count(), 3);
    table.check().expect("trie stays structurally sound");

    let hit = table.match_ipv4(Ipv4Addr::new(10, 5, 5, 5)).unwrap();
    assert_eq!(*hit.info(), Some(1));
}

#[test]
fn deleting_a_route_collapses_its_glue_node() {
    common::init();
    let table: Table<u32> = Table::new(Afi::Ipv4, Safi::Unicast);
    let a = table.get(v4([10, 0, 0, 0], 8), None);
    a.set_info(Some(1));
    let b = table.get(v4([11, 0, 0, 0], 8), None);
    b.set_info(Some(2));
    assert_eq!(table.count(), 3);

    // Clearing the payload and dropping the caller's lock should
    // delete the node and collapse the now-single-child glue above it.
    a.set_info(None);
    drop(a);
    drop(b);

    assert_eq!(table.count(), 1);
    table.check().expect("glue collapses back to a single leaf");
    assert!(table.match_ipv4(Ipv4Addr::new(10, 0, 0, 1)).is_none());
    let hit = table.match_ipv4(Ipv4Addr::new(11, 0, 0, 1)).unwrap();
    assert_eq!(*hit.info(), Some(2));
}

#[test]
fn longest_prefix_match_prefers_the_deepest_covering_route() {
    common::init();
    let table: Table<&'static str> = Table::new(Afi::Ipv4, Safi::Unicast);
    table.get(v4([10, 0, 0, 0], 8), None).set_info(Some("wide"));
    table.get(v4([10, 1, 0, 0], 16), None).set_info(Some("mid"));
    table.get(v4([10, 1, 2, 0], 24), None).set_info(Some("narrow"));

    let hit = table.match_ipv4(Ipv4Addr::new(10, 1, 2, 200)).unwrap();
    assert_eq!(*hit.info(), Some("narrow"));

    let hit = table.match_ipv4(Ipv4Addr::new(10, 1, 9, 9)).unwrap();
    assert_eq!(*hit.info(), Some("mid"));

    let hit = table.match_ipv4(Ipv4Addr::new(10, 9, 9, 9)).unwrap();
    assert_eq!(*hit.info(), Some("wide"));
}

#[test]
fn iteration_visits_every_route_in_prefix_order_and_survives_deletion() {
    common::init();
    let table: Table<u32> = Table::new(Afi::Ipv4, Safi::Unicast);
    for (i, len) in [(10, 8), (11, 8), (12, 8)].iter().enumerate() {
        table.get(v4([len.0, 0, 0, 0], len.1), None).set_info(Some(i as u32));
    }

    let mut seen = Vec::new();
    let mut cursor = table.first();
    while let Some(node) = cursor {
        if node.info().is_some() {
            seen.push(node.prefix());
        }
        // Deleting the one route already visited must not derail the
        // walk over the remaining two (§4.5's "legal to delete the
        // current node between steps").
        if seen.len() == 1 {
            table.get(v4([10, 0, 0, 0], 8), None).set_info(None);
        }
        cursor = node.next();
    }

    assert_eq!(seen.len(), 3);
}

#[test]
fn random_insertions_keep_the_trie_structurally_sound() {
    common::init();
    let table: Table<u32> = Table::new(Afi::Ipv4, Safi::Unicast);
    let mut rng = rand::rng();
    let mut inserted = Vec::new();

    for i in 0..500u32 {
        let octets = [rng.random(), rng.random(), rng.random(), rng.random()];
        let len = rng.random_range(1..=32);
        let prefix = v4(octets, len);
        table.get(prefix, None).set_info(Some(i));
        inserted.push(prefix);
    }

    table.check().expect("trie built from random insertions obeys its invariants");

    for prefix in &inserted {
        assert!(table.lookup(*prefix).is_some(), "every inserted prefix stays exactly reachable");
    }
}

#[test]
fn default_route_and_host_leaf_are_both_valid_boundaries() {
    common::init();
    let table: Table<u32> = Table::new(Afi::Ipv4, Safi::Unicast);

    let default_route = table.get(v4([0, 0, 0, 0], 0), None);
    default_route.set_info(Some(0));
    assert_eq!(default_route.prefix().len(), 0);

    let host = table.get(v4([10, 1, 2, 3], 32), None);
    host.set_info(Some(1));
    assert_eq!(host.prefix().len(), 32);

    drop(default_route);
    drop(host);

    assert_eq!(table.count(), 2);
    table.check().expect("a /0 default route and a /32 host leaf coexist cleanly");

    let specific = table.match_ipv4(Ipv4Addr::new(10, 1, 2, 3)).unwrap();
    assert_eq!(*specific.info(), Some(1));
    let fallback = table.match_ipv4(Ipv4Addr::new(8, 8, 8, 8)).unwrap();
    assert_eq!(*fallback.info(), Some(0));
}

#[test]
fn get_with_a_route_distinguisher_back_pointer() {
    common::init();
    let rd_table: Table<u32> = Table::new(Afi::Ipv4, Safi::MplsVpn);
    let rd_node = rd_table.get(v4([0, 0, 0, 0], 0), None);
    rd_node.set_info(Some(999));

    let vpn_table: Table<u32> = Table::new(Afi::Ipv4, Safi::MplsVpn);
    let route = vpn_table.get(v4([192, 0, 2, 0], 24), Some(rd_node.clone()));
    route.set_info(Some(1));

    let prn = route.prn().expect("prn was attached at creation");
    assert_eq!(prn.prefix(), rd_node.prefix());
    assert_eq!(*prn.info(), Some(999));

    // Re-`get`-ing the same prefix with the same prn must agree with the
    // `prn_matches` debug assertion rather than panic, and must return
    // the very same node.
    let again = vpn_table.get(v4([192, 0, 2, 0], 24), Some(rd_node.clone()));
    assert_eq!(again.prefix(), route.prefix());
    assert_eq!(vpn_table.count(), 1);
}
