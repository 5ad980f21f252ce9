//! Variable-length IP prefixes: canonical form, bit extraction, coverage
//! and the common-prefix computation the trie core splices glue nodes on.
//!
//! Grounded in `bgpd/bgp_table.c`'s `route_common`/`prefix_match`/
//! `prefix_bit` (see `examples/original_source/bgpd/bgp_table.c`), kept
//! as a byte-array representation (rather than the teacher crate's
//! integer-backed `AddressFamily`) because the wire length here runs to
//! 128 bits.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Largest byte width we ever need to hold (IPv6, 128 bits).
pub const MAX_BYTES: usize = 16;

/// Masks, indexed by number of set bits in the final partial byte.
/// Lifted straight from `bgp_table.c`'s `maskbit[]`.
const MASKBIT: [u8; 9] = [0x00, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe, 0xff];

/// Address family tag. Only IPv4 and IPv6 are supported; the max prefix
/// length is fixed per family.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub const fn max_len(self) -> u8 {
        match self {
            Family::Ipv4 => 32,
            Family::Ipv6 => 128,
        }
    }

    const fn byte_len(self) -> usize {
        match self {
            Family::Ipv4 => 4,
            Family::Ipv6 => 16,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Ipv4 => write!(f, "IPv4"),
            Family::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// A `(family, prefix_length, bits)` value, always kept in canonical
/// form: bits beyond `len` are zero (invariant §3.4 clause 7/8).
#[derive(Copy, Clone, Eq, Hash)]
pub struct Prefix {
    family: Family,
    len: u8,
    bits: [u8; MAX_BYTES],
}

impl Prefix {
    /// Build a prefix from a family, length and raw bytes, masking any
    /// bits beyond `len` to zero (the canonicalization every caller in
    /// `bgp_table.c` gets for free from `prefix_copy`/`apply_mask`).
    pub fn new(family: Family, len: u8, bytes: &[u8]) -> Self {
        assert!(len <= family.max_len(), "prefix length exceeds family width");
        let mut bits = [0u8; MAX_BYTES];
        let n = family.byte_len().min(bytes.len());
        bits[..n].copy_from_slice(&bytes[..n]);
        let mut p = Prefix { family, len, bits };
        p.truncate_in_place();
        p
    }

    /// The zero-length ("default route") prefix for a family.
    pub fn default_route(family: Family) -> Self {
        Prefix { family, len: 0, bits: [0u8; MAX_BYTES] }
    }

    /// Host-length prefix wrapping a concrete address (used by
    /// `match_ipv4`/`match_ipv6`).
    pub fn host(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => Prefix::new(Family::Ipv4, 32, &a.octets()),
            IpAddr::V6(a) => Prefix::new(Family::Ipv6, 128, &a.octets()),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bits[..self.family.byte_len()]
    }

    /// Mask off every bit beyond `len`. Idempotent.
    fn truncate_in_place(&mut self) {
        let full_bytes = (self.len / 8) as usize;
        let rem = (self.len % 8) as usize;
        let byte_len = self.family.byte_len();
        if full_bytes < byte_len {
            self.bits[full_bytes] &= MASKBIT[rem];
        }
        for b in &mut self.bits[(full_bytes + 1).min(byte_len)..byte_len] {
            *b = 0;
        }
    }

    /// `bit_at(n)`: bit `n` counted from the most significant bit (bit 0
    /// is the top bit of byte 0). Returns 0 or 1.
    pub fn bit_at(&self, n: u8) -> u8 {
        let byte = (n / 8) as usize;
        let shift = 7 - (n % 8);
        (self.bits[byte] >> shift) & 1
    }

    /// `self covers other`: `self.len <= other.len` and the first
    /// `self.len` bits agree, per §3.1.
    pub fn covers(&self, other: &Prefix) -> bool {
        if self.family != other.family || self.len > other.len {
            return false;
        }
        Self::bits_match(&self.bits, &other.bits, self.len)
    }

    fn bits_match(a: &[u8; MAX_BYTES], b: &[u8; MAX_BYTES], len: u8) -> bool {
        let full_bytes = (len / 8) as usize;
        let rem = len % 8;
        if a[..full_bytes] != b[..full_bytes] {
            return false;
        }
        if rem == 0 {
            return true;
        }
        let mask = MASKBIT[rem as usize];
        (a[full_bytes] & mask) == (b[full_bytes] & mask)
    }

    /// Every bit beyond `len` is zero (§3.4 clause 7/8). Used by the
    /// invariant checker; `new`/`truncate_in_place` keep this true by
    /// construction, so violations here indicate a bug in this crate,
    /// not caller misuse.
    pub fn is_canonical(&self) -> bool {
        let mut probe = *self;
        probe.truncate_in_place();
        probe.bits == self.bits
    }

    /// `common_prefix(a, b)`: the longest prefix covering both `a` and
    /// `b`. Scans byte-wise until divergence, then bit-wise within the
    /// diverging byte, capped at `min(a.len, b.len)`. Equal inputs
    /// return a copy at the same length (§4.1).
    pub fn common_prefix(a: &Prefix, b: &Prefix) -> Prefix {
        assert_eq!(a.family, b.family, "common_prefix across address families");
        let cap = a.len.min(b.len);
        let byte_len = a.family.byte_len();

        let mut i = 0usize;
        while i < (cap / 8) as usize && a.bits[i] == b.bits[i] {
            i += 1;
        }

        let mut len = (i as u8) * 8;
        if len != cap && i < byte_len {
            let diff = a.bits[i] ^ b.bits[i];
            let mut mask = 0x80u8;
            while len < cap && (mask & diff) == 0 {
                mask >>= 1;
                len += 1;
            }
        }

        Prefix::new(a.family, len, &a.bits[..byte_len])
    }
}

impl PartialEq for Prefix {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family && self.len == other.len && self.bits == other.bits
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self, self.len)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Family::Ipv4 => {
                let mut o = [0u8; 4];
                o.copy_from_slice(&self.bits[..4]);
                write!(f, "{}/{}", Ipv4Addr::from(o), self.len)
            }
            Family::Ipv6 => {
                let mut o = [0u8; 16];
                o.copy_from_slice(&self.bits[..16]);
                write!(f, "{}/{}", Ipv6Addr::from(o), self.len)
            }
        }
    }
}

impl From<inetnum::addr::Prefix> for Prefix {
    fn from(value: inetnum::addr::Prefix) -> Self {
        Prefix::new(
            match value.addr() {
                IpAddr::V4(_) => Family::Ipv4,
                IpAddr::V6(_) => Family::Ipv6,
            },
            value.len(),
            &match value.addr() {
                IpAddr::V4(a) => a.octets().to_vec(),
                IpAddr::V6(a) => a.octets().to_vec(),
            },
        )
    }
}

impl TryFrom<Prefix> for inetnum::addr::Prefix {
    type Error = String;

    fn try_from(value: Prefix) -> Result<Self, Self::Error> {
        let addr = match value.family {
            Family::Ipv4 => {
                let mut o = [0u8; 4];
                o.copy_from_slice(&value.bits[..4]);
                IpAddr::V4(Ipv4Addr::from(o))
            }
            Family::Ipv6 => {
                let mut o = [0u8; 16];
                o.copy_from_slice(&value.bits[..16]);
                IpAddr::V6(Ipv6Addr::from(o))
            }
        };
        inetnum::addr::Prefix::new(addr, value.len)
            .map_err(|e| format!("{:?}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> Prefix {
        let (addr, len) = s.split_once('/').unwrap();
        Prefix::new(Family::Ipv4, len.parse().unwrap(), &addr.parse::<Ipv4Addr>().unwrap().octets())
    }

    #[test]
    fn canonicalizes_on_construction() {
        let p = Prefix::new(Family::Ipv4, 8, &[10, 255, 255, 255]);
        assert_eq!(p.bytes(), &[10, 0, 0, 0]);
        assert!(p.is_canonical());
    }

    #[test]
    fn covers_is_prefix_relation() {
        let a = v4("10.0.0.0/8");
        let b = v4("10.1.2.3/32");
        let c = v4("11.0.0.0/8");
        assert!(a.covers(&b));
        assert!(!a.covers(&c));
        assert!(a.covers(&a));
    }

    #[test]
    fn bit_at_counts_from_msb() {
        let p = v4("128.0.0.0/8");
        assert_eq!(p.bit_at(0), 1);
        assert_eq!(p.bit_at(1), 0);
    }

    #[test]
    fn common_prefix_diverges_within_byte() {
        let a = v4("10.0.0.0/8");
        let b = v4("11.0.0.0/8");
        let c = Prefix::common_prefix(&a, &b);
        assert_eq!(c.len(), 7);
        assert_eq!(c.bytes(), &[10, 0, 0, 0]);
    }

    #[test]
    fn common_prefix_of_equal_inputs_is_identity() {
        let a = v4("10.1.0.0/16");
        let c = Prefix::common_prefix(&a, &a);
        assert_eq!(c, a);
    }

    #[test]
    fn common_prefix_capped_at_shorter_length() {
        let a = v4("10.0.0.0/8");
        let b = v4("10.128.0.0/9");
        let c = Prefix::common_prefix(&a, &b);
        assert_eq!(c, a);
    }
}
