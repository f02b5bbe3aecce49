//! UDP server loop.
//!
//! Receives client queries, answers blocked domains with a synthesized
//! NXDOMAIN, and dispatches everything else to the iterative resolver on its
//! own task so one slow delegation chain cannot starve other clients. Any
//! per-request failure is logged and the request dropped; the client never
//! sees an error response, only the deliberate blocked-domain NXDOMAIN.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::dns::{self, HEADER_LEN, MAX_MESSAGE_SIZE};
use crate::filter::Blocklist;
use crate::resolver::{ResolveError, Resolver};

/// Name error (NXDOMAIN).
const RCODE_NXDOMAIN: u8 = 3;
/// Wall-clock budget for one client request, all hops included.
const REQUEST_DEADLINE: Duration = Duration::from_secs(20);

/// Shared, read-only state handed to every request task.
struct Context {
    socket: Arc<UdpSocket>,
    blocklist: Blocklist,
    resolver: Resolver,
}

/// The sinkhole server: one listening socket plus shared request context.
pub struct Server {
    ctx: Arc<Context>,
}

impl Server {
    /// Bind the client-facing socket.
    pub async fn bind(
        addr: SocketAddr,
        blocklist: Blocklist,
        resolver: Resolver,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        Ok(Self {
            ctx: Arc::new(Context {
                socket,
                blocklist,
                resolver,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.ctx.socket.local_addr()
    }

    /// Receive datagrams forever, spawning one task per request.
    pub async fn run(self) -> io::Result<()> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];

        loop {
            let (len, client) = match self.ctx.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "recv error");
                    continue;
                }
            };

            if len < HEADER_LEN {
                warn!(%client, len, "dropping short datagram");
                continue;
            }

            let query = buf[..len].to_vec();
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_request(&ctx, query, client).await {
                    warn!(%client, error = %e, "request dropped");
                }
            });
        }
    }
}

/// Serve one client query to completion.
async fn handle_request(
    ctx: &Context,
    mut query: Vec<u8>,
    client: SocketAddr,
) -> Result<(), ResolveError> {
    let (name, _) = dns::decode_name(&query, HEADER_LEN)?;

    if ctx.blocklist.contains(&name) {
        // Flip the query itself into an NXDOMAIN response; RD stays as the
        // client sent it. No upstream traffic for blocked domains.
        dns::set_qr(&mut query);
        dns::set_ra(&mut query);
        dns::set_rcode(&mut query, RCODE_NXDOMAIN);
        ctx.socket.send_to(&query, client).await?;
        info!(%client, domain = %name, "blocked");
        return Ok(());
    }

    let mut response = timeout(REQUEST_DEADLINE, ctx.resolver.resolve(&query))
        .await
        .map_err(|_| ResolveError::DeadlineExceeded)??;

    // Present ourselves as a recursive resolver: response bit on, the
    // client's recursion-desired bit off, recursion-available on.
    dns::set_qr(&mut response);
    dns::clear_rd(&mut response);
    dns::set_ra(&mut response);
    ctx.socket.send_to(&response, client).await?;
    info!(%client, domain = %name, rcode = dns::rcode(&response), "resolved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    use crate::dns::{encode_name, CLASS_IN, TYPE_A, TYPE_NS};

    fn query(id: u16, domain: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&[0x01, 0x00]); // RD
        buf.extend_from_slice(&[0x00, 0x01]);
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        buf.extend_from_slice(&encode_name(domain));
        buf.extend_from_slice(&TYPE_A.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf
    }

    /// Referral steering resolution back to the fake nameserver: NS record
    /// in authority plus a 127.0.0.1 glue record in additional.
    fn referral_response(request: &[u8], ns: &str) -> Vec<u8> {
        let mut buf = request.to_vec();
        buf[2] |= 0x80; // QR
        buf[8..10].copy_from_slice(&1u16.to_be_bytes()); // NSCOUNT
        buf[10..12].copy_from_slice(&1u16.to_be_bytes()); // ARCOUNT

        let ns_rdata = encode_name(ns);
        buf.extend_from_slice(&[0xC0, HEADER_LEN as u8]);
        buf.extend_from_slice(&TYPE_NS.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 60]);
        buf.extend_from_slice(&(ns_rdata.len() as u16).to_be_bytes());
        let ns_at = buf.len();
        buf.extend_from_slice(&ns_rdata);

        buf.extend_from_slice(&[0xC0, ns_at as u8]);
        buf.extend_from_slice(&TYPE_A.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 60]);
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&Ipv4Addr::LOCALHOST.octets());
        buf
    }

    fn answer_response(request: &[u8]) -> Vec<u8> {
        let mut buf = request.to_vec();
        buf[2] |= 0x80; // QR
        buf[6..8].copy_from_slice(&1u16.to_be_bytes()); // ANCOUNT

        buf.extend_from_slice(&[0xC0, HEADER_LEN as u8]);
        buf.extend_from_slice(&TYPE_A.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 60]);
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[192, 0, 2, 1]);
        buf
    }

    /// Fake nameserver answering `referrals` referral responses before a
    /// final answer.
    async fn scripted_upstream(referrals: usize) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_MESSAGE_SIZE];
            let mut served = 0;
            loop {
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let request = &buf[..len];
                let response = if served < referrals {
                    referral_response(request, "ns.fake.test")
                } else {
                    answer_response(request)
                };
                socket.send_to(&response, src).await.unwrap();
                served += 1;
            }
        });
        addr
    }

    async fn spawn_server(blocked: &[&str], resolver: Resolver) -> SocketAddr {
        let blocklist: Blocklist = blocked.iter().map(|s| s.to_string()).collect();
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), blocklist, resolver)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn exchange(server: SocketAddr, request: &[u8]) -> Vec<u8> {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(request, server).await.unwrap();
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..len].to_vec()
    }

    #[tokio::test]
    async fn blocked_domain_gets_nxdomain_back() {
        let addr = spawn_server(&["ads.example.com"], Resolver::new()).await;
        let request = query(0xBEEF, "ads.example.com");

        let response = exchange(addr, &request).await;

        assert_eq!(dns::id(&response), 0xBEEF);
        assert_eq!(response[2] & 0x80, 0x80, "QR set");
        assert_eq!(response[2] & 0x01, 0x01, "RD preserved");
        assert_eq!(response[3] & 0x80, 0x80, "RA set");
        assert_eq!(dns::rcode(&response), RCODE_NXDOMAIN);
        // Question section identical to the request.
        assert_eq!(&response[HEADER_LEN..], &request[HEADER_LEN..]);
    }

    #[tokio::test]
    async fn resolved_response_reaches_client_with_rewritten_flags() {
        let upstream = scripted_upstream(3).await;
        let addr = spawn_server(&[], Resolver::pinned_to(upstream)).await;
        let request = query(0xD00D, "www.example.com");

        let response = exchange(addr, &request).await;

        assert_eq!(dns::id(&response), 0xD00D);
        assert_ne!(response[2] & 0x80, 0, "QR set");
        assert_eq!(response[2] & 0x01, 0, "RD cleared");
        assert_ne!(response[3] & 0x80, 0, "RA set");
        assert_eq!(dns::ancount(&response), 1);
        // Question section comes back unchanged.
        let (name, _) = dns::decode_name(&response, HEADER_LEN).unwrap();
        assert_eq!(name, "www.example.com");
    }

    #[tokio::test]
    async fn capped_referral_chain_is_forwarded_with_rewritten_flags() {
        let upstream = scripted_upstream(100).await;
        let addr = spawn_server(&[], Resolver::pinned_to(upstream)).await;
        let request = query(0xF00F, "www.example.com");

        let response = exchange(addr, &request).await;

        // Still referral-shaped: the cap forwards the last response as-is
        // apart from the flag rewrite.
        assert_eq!(dns::ancount(&response), 0);
        assert!(dns::nscount(&response) > 0);
        assert_ne!(response[2] & 0x80, 0, "QR set");
        assert_eq!(response[2] & 0x01, 0, "RD cleared");
        assert_ne!(response[3] & 0x80, 0, "RA set");
    }

    #[tokio::test]
    async fn malformed_datagram_does_not_wedge_the_server() {
        let addr = spawn_server(&["ads.example.com"], Resolver::new()).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Too short for a header, then structurally broken past the header.
        client.send_to(&[0x12, 0x34, 0x00], addr).await.unwrap();
        let mut broken = query(1, "ads.example.com");
        broken.truncate(14);
        client.send_to(&broken, addr).await.unwrap();

        // A well-formed query is still served.
        let request = query(0xCAFE, "ads.example.com");
        let response = exchange(addr, &request).await;

        assert_eq!(dns::id(&response), 0xCAFE);
        assert_eq!(dns::rcode(&response), RCODE_NXDOMAIN);
    }
}
