//! Iterative DNS resolution.
//!
//! Drives a query from a root nameserver down the delegation chain: send the
//! original client query, inspect the response, and on a referral re-send the
//! same query to the nameserver the authority section points at. The loop
//! ends on the first non-referral response (a real answer and an upstream
//! NXDOMAIN look the same to us, the buffer goes back as-is) or after
//! [`MAX_ROUNDS`] referrals, whichever comes first.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::dns::{self, DnsError, HEADER_LEN, MAX_MESSAGE_SIZE};
use crate::upstream;

/// Hard cap on referrals followed for one client query. Hitting the cap is
/// not an error: the last response is returned even if still a referral.
pub const MAX_ROUNDS: usize = 16;

const DNS_PORT: u16 = 53;
const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Failures while resolving one client query.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed upstream response: {0}")]
    Dns(#[from] DnsError),
    #[error("upstream i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response from {0} within {1:?}")]
    UpstreamTimeout(SocketAddr, Duration),
    #[error("no address found for nameserver {0}")]
    NoAddress(String),
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Iterative resolver configuration, shared across all in-flight requests.
///
/// Each call to [`Resolver::resolve`] opens its own upstream socket, so one
/// slow delegation chain never blocks another request.
pub struct Resolver {
    upstream_port: u16,
    hop_timeout: Duration,
    /// First hop to use instead of a random root. Only ever set by tests,
    /// which script a fake nameserver on an ephemeral port.
    first_hop: Option<SocketAddr>,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            upstream_port: DNS_PORT,
            hop_timeout: DEFAULT_HOP_TIMEOUT,
            first_hop: None,
        }
    }

    /// Override the upstream port (tests run fake nameservers on ephemeral
    /// ports; real resolution always talks to 53).
    #[cfg(test)]
    fn with_upstream_port(port: u16) -> Self {
        Self {
            upstream_port: port,
            hop_timeout: Duration::from_millis(500),
            first_hop: None,
        }
    }

    /// A resolver whose first hop is pinned to `addr` instead of a random
    /// root, so server-level tests can run against a scripted nameserver.
    #[cfg(test)]
    pub(crate) fn pinned_to(addr: SocketAddr) -> Self {
        Self {
            upstream_port: addr.port(),
            hop_timeout: Duration::from_millis(500),
            first_hop: Some(addr),
        }
    }

    /// Resolve a raw client query iteratively, starting from a random root.
    ///
    /// Returns the final response buffer untouched; the caller decides how
    /// to rewrite its flags before handing it to the client.
    pub async fn resolve(&self, query: &[u8]) -> Result<Vec<u8>, ResolveError> {
        let addr = match self.first_hop {
            Some(addr) => addr,
            None => self.lookup(upstream::pick_root()).await?,
        };
        self.resolve_from(query, addr).await
    }

    /// The hop loop, starting from an already-resolved first nameserver.
    async fn resolve_from(
        &self,
        query: &[u8],
        mut addr: SocketAddr,
    ) -> Result<Vec<u8>, ResolveError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let mut rounds = 0;

        loop {
            // The original client query is reused unmodified on every hop.
            socket.send_to(query, addr).await?;
            let len = self.recv(&socket, &mut buf, addr).await?;
            let response = &buf[..len];

            if !dns::is_referral(response) {
                return Ok(response.to_vec());
            }

            rounds += 1;
            if rounds >= MAX_ROUNDS {
                debug!(rounds, "referral cap reached, returning last response");
                return Ok(response.to_vec());
            }

            let ns = dns::referral_target(response)?;
            addr = self.nameserver_addr(response, &ns).await?;
            debug!(rounds, nameserver = %ns, next = %addr, "following referral");
        }
    }

    async fn recv(
        &self,
        socket: &UdpSocket,
        buf: &mut [u8],
        from: SocketAddr,
    ) -> Result<usize, ResolveError> {
        loop {
            let (len, src) = timeout(self.hop_timeout, socket.recv_from(buf))
                .await
                .map_err(|_| ResolveError::UpstreamTimeout(from, self.hop_timeout))??;
            // Stray datagrams from other peers are not our response.
            if src != from {
                continue;
            }
            if len < HEADER_LEN {
                return Err(ResolveError::Dns(DnsError::Truncated));
            }
            return Ok(len);
        }
    }

    /// Address of the next nameserver: glue from the referral itself when
    /// present, otherwise the platform resolver.
    async fn nameserver_addr(
        &self,
        response: &[u8],
        ns: &str,
    ) -> Result<SocketAddr, ResolveError> {
        match dns::glue_address(response, ns) {
            Ok(Some(ip)) => Ok(SocketAddr::new(ip.into(), self.upstream_port)),
            Ok(None) => self.lookup(ns).await,
            Err(e) => {
                debug!(
                    nameserver = ns,
                    error = %e,
                    "unparseable additional section, falling back to host lookup"
                );
                self.lookup(ns).await
            }
        }
    }

    async fn lookup(&self, host: &str) -> Result<SocketAddr, ResolveError> {
        upstream::resolve_host(host, self.upstream_port)
            .await?
            .ok_or_else(|| ResolveError::NoAddress(host.to_string()))
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}
