//! Root nameserver selection and nameserver address lookup.

use std::io;
use std::net::SocketAddr;

use rand::Rng;
use tokio::net::lookup_host;

/// The 13 well-known root nameservers.
pub const ROOT_SERVERS: [&str; 13] = [
    "a.root-servers.net",
    "b.root-servers.net",
    "c.root-servers.net",
    "d.root-servers.net",
    "e.root-servers.net",
    "f.root-servers.net",
    "g.root-servers.net",
    "h.root-servers.net",
    "i.root-servers.net",
    "j.root-servers.net",
    "k.root-servers.net",
    "l.root-servers.net",
    "m.root-servers.net",
];

/// Pick one of the root servers uniformly at random for the first hop of a
/// fresh resolution.
pub fn pick_root() -> &'static str {
    ROOT_SERVERS[rand::rng().random_range(0..ROOT_SERVERS.len())]
}

/// Resolve a nameserver hostname through the platform resolver.
///
/// Used for root servers and for referral targets whose response carried no
/// usable glue record. Returns the first address found.
pub async fn resolve_host(host: &str, port: u16) -> io::Result<Option<SocketAddr>> {
    Ok(lookup_host((host, port)).await?.next())
}
