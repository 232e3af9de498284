//! Host identity: the machine's hardware address as a 48-bit integer.

use crate::types::HostIdentity;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use sysinfo::Networks;
use tracing::warn;

// set on addresses that did not come from a network interface
const MULTICAST_BIT: u64 = 1 << 40;
const MAC_MASK: u64 = (1 << 48) - 1;

pub fn mac_to_u64(octets: [u8; 6]) -> u64 {
    octets.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// First non-zero interface address, by interface name so the choice is
/// stable across restarts.
pub fn pick_interface_mac<'a, I>(interfaces: I) -> Option<u64>
where
    I: IntoIterator<Item = (&'a str, [u8; 6])>,
{
    let mut candidates: Vec<(&str, [u8; 6])> = interfaces
        .into_iter()
        .filter(|(_, mac)| mac.iter().any(|b| *b != 0))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(b.0));
    candidates.first().map(|(_, mac)| mac_to_u64(*mac))
}

fn hostname_fallback() -> u64 {
    let name = hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let mut h = DefaultHasher::new();
    name.hash(&mut h);
    (h.finish() & MAC_MASK) | MULTICAST_BIT
}

/// Resolve once at startup. `override_id` wins when set.
pub fn resolve(override_id: Option<u64>) -> HostIdentity {
    if let Some(id) = override_id {
        return HostIdentity(id);
    }
    let nets = Networks::new_with_refreshed_list();
    let found = pick_interface_mac(
        nets.iter()
            .map(|(name, data)| (name.as_str(), data.mac_address().0)),
    );
    match found {
        Some(mac) => HostIdentity(mac),
        None => {
            let id = hostname_fallback();
            warn!(id, "no interface hardware address, deriving identity from hostname");
            HostIdentity(id)
        }
    }
}
