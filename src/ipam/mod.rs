use std::collections::HashSet;
use std::net::Ipv4Addr;

use rand::seq::SliceRandom;

use crate::error::{BridgeError, Result};

/// Pool of candidate addresses expanded from the managed CIDR ranges.
///
/// Expansion keeps the full block including network and broadcast
/// addresses, in ascending order, matching what the upstream billing
/// platform expects to see on the usage page.
#[derive(Debug, Clone)]
pub struct IpPool {
    addresses: Vec<Ipv4Addr>,
}

impl IpPool {
    /// Build a pool from a comma-separated CIDR list, e.g.
    /// `"93.119.183.0/24, 10.0.4.0/30"`. Whitespace around entries is
    /// tolerated; any malformed entry fails the whole list.
    pub fn from_cidr_list(list: &str) -> Result<Self> {
        let mut addresses = Vec::new();
        for cidr in list.split(',') {
            let cidr = cidr.trim();
            if cidr.is_empty() {
                continue;
            }
            addresses.extend(expand_cidr(cidr)?);
        }
        Ok(Self { addresses })
    }

    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Pick one address at random among the candidates not present in
    /// `in_use`. The caller supplies the addresses currently assigned on
    /// the router so two devices never share a remote-address.
    pub fn allocate(&self, in_use: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr> {
        let free: Vec<Ipv4Addr> = self
            .addresses
            .iter()
            .copied()
            .filter(|addr| !in_use.contains(addr))
            .collect();

        free.choose(&mut rand::thread_rng())
            .copied()
            .ok_or(BridgeError::AllocationExhausted)
    }
}

/// Expand one `a.b.c.d/p` block into every address it covers, ascending.
fn expand_cidr(cidr: &str) -> Result<Vec<Ipv4Addr>> {
    let (addr_part, prefix_part) = cidr
        .split_once('/')
        .ok_or_else(|| BridgeError::Config(format!("CIDR '{}' is missing a prefix length", cidr)))?;

    let base: Ipv4Addr = addr_part
        .parse()
        .map_err(|_| BridgeError::Config(format!("CIDR '{}' has an invalid address", cidr)))?;

    let prefix: u32 = prefix_part
        .parse()
        .map_err(|_| BridgeError::Config(format!("CIDR '{}' has a non-numeric prefix", cidr)))?;
    if prefix > 32 {
        return Err(BridgeError::Config(format!(
            "CIDR '{}' prefix length out of range",
            cidr
        )));
    }

    let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(base) & mask;
    let count: u64 = 1u64 << (32 - prefix);

    let mut out = Vec::with_capacity(count as usize);
    for offset in 0..count {
        out.push(Ipv4Addr::from(network + offset as u32));
    }
    Ok(out)
}
