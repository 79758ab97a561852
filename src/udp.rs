use crate::Error;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing::{debug, info, warn};

pub(crate) const SSDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub(crate) const SSDP_PORT: u16 = 1900;

/// The well-known multicast destination for all SSDP traffic.
pub(crate) const fn group_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(SSDP_GROUP, SSDP_PORT))
}

/// Async UDP endpoint abstraction, so the engine can run against a real
/// socket in production and an in-memory fake in tests.
pub(crate) trait Transport: Send + Sync + 'static {
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;
}

impl Transport for tokio::net::UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        tokio::net::UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        tokio::net::UdpSocket::recv_from(self, buf).await
    }
}

/// Open the SSDP endpoint: a reusable non-blocking IPv4 socket bound to
/// `0.0.0.0:1900`, with multicast loopback enabled and group membership
/// on every interface that carries a real IPv4 address.
///
/// # Errors
///
/// `Error::NoInterface` if no interface could be joined to the group;
/// `Error::Io` for bind/setsockopt failures (e.g. the port is taken by
/// a non-reusable socket).
pub(crate) fn bind_multicast() -> Result<std::net::UdpSocket, Error> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT);
    socket.bind(&SocketAddr::V4(bind_addr).into())?;

    let socket: std::net::UdpSocket = socket.into();
    socket.set_multicast_loop_v4(true)?;

    let mut joined = 0usize;
    for interface in get_if_addrs::get_if_addrs()? {
        let IpAddr::V4(addr) = interface.ip() else {
            continue;
        };
        if addr.is_unspecified() {
            continue;
        }
        match socket.join_multicast_v4(&SSDP_GROUP, &addr) {
            Ok(()) => {
                debug!(interface = %interface.name, %addr, "joined SSDP multicast group");
                joined += 1;
            }
            Err(e) => {
                warn!(interface = %interface.name, %addr, error = %e,
                    "failed to join SSDP multicast group");
            }
        }
    }
    if joined == 0 {
        return Err(Error::NoInterface);
    }
    info!(
        interfaces = joined,
        "SSDP endpoint ready on 0.0.0.0:{SSDP_PORT}"
    );
    Ok(socket)
}
