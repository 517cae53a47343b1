//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

//! The narrow external boundary the core consumes: a bridge-side
//! Ethernet frame duplex and a backbone-side IP datagram duplex. Per
//! the system scope, everything that delivers bytes to these duplexes
//! — TAP plumbing, topology harness, process supervision — is an
//! external collaborator; this module only defines the trait boundary
//! plus one concrete backbone adapter.
//!
//! The backbone adapter is grounded on the raw-socket creation pattern
//! in `holo-vrrp/src/network.rs` (`socket2` for creation/binding) and
//! `holo-bfd/src/network.rs` (`nix::sys::socket` for the actual
//! recv/send calls), which together avoid ever touching a raw libc FFI
//! call directly. IPv6 on the backbone is out of scope, so only
//! `AF_INET` sockets are created here.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::{AsRawFd, RawFd};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use nix::sys::socket::{self, SockaddrIn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::error::IoError;
use crate::packet::{IPPROTO_AH, IPPROTO_HIP};

/// Maximum datagram size read off the backbone in one call. Generous
/// for an Ethernet-over-AH tunnel; larger frames are simply not
/// expected on the segments this core bridges.
const MAX_DATAGRAM_LEN: usize = 9216;

/// The bridge-side duplex: whole Ethernet frames (MAC header included,
/// FCS excluded), no VLAN rewriting.
#[async_trait]
pub trait BridgeDuplex: Send + Sync {
    async fn recv(&self) -> io::Result<Bytes>;
    async fn send(&self, frame: Bytes) -> io::Result<()>;
}

/// The backbone-side duplex: IP datagrams tagged with their IP protocol
/// number (139 for HIP control, 51 for AH) and the peer's source
/// address.
#[async_trait]
pub trait BackboneDuplex: Send + Sync {
    async fn recv(&self) -> io::Result<(IpAddr, u8, Bytes)>;
    async fn send(&self, to: IpAddr, protocol: u8, datagram: Bytes) -> io::Result<()>;
}

/// A pair of raw IPv4 sockets, one per protocol number this core
/// speaks, wrapped for async readiness via `AsyncFd`.
pub struct RawIpBackbone {
    hip: AsyncFd<Socket>,
    ah: AsyncFd<Socket>,
}

impl RawIpBackbone {
    pub fn new(local: Ipv4Addr) -> Result<RawIpBackbone, IoError> {
        let hip = raw_socket(local, IPPROTO_HIP)?;
        let ah = raw_socket(local, IPPROTO_AH)?;
        Ok(RawIpBackbone {
            hip: AsyncFd::new(hip).map_err(IoError::BackboneSocket)?,
            ah: AsyncFd::new(ah).map_err(IoError::BackboneSocket)?,
        })
    }
}

fn raw_socket(local: Ipv4Addr, protocol: u8) -> Result<Socket, IoError> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(protocol as i32)))
        .map_err(IoError::BackboneSocket)?;
    socket.set_nonblocking(true).map_err(IoError::BackboneSocket)?;
    let addr = SockaddrIn::from(std::net::SocketAddrV4::new(local, 0));
    socket::bind(socket.as_raw_fd(), &addr).map_err(|errno| {
        IoError::BackboneSocket(io::Error::from(errno))
    })?;
    Ok(socket)
}

#[async_trait]
impl BackboneDuplex for RawIpBackbone {
    async fn recv(&self) -> io::Result<(IpAddr, u8, Bytes)> {
        let (fd, protocol) = select_readable(&self.hip, &self.ah).await?;
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let socket_ref = if protocol == IPPROTO_HIP { &self.hip } else { &self.ah };
            let mut guard = socket_ref.readable().await?;
            match guard.try_io(|_| recv_from(fd, &mut buf)) {
                Ok(result) => {
                    let (len, addr) = result?;
                    return Ok((IpAddr::V4(addr), protocol, Bytes::copy_from_slice(&buf[..len])));
                }
                Err(_would_block) => continue,
            }
        }
    }

    async fn send(&self, to: IpAddr, protocol: u8, datagram: Bytes) -> io::Result<()> {
        let IpAddr::V4(to) = to else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "IPv6 backbone unsupported"));
        };
        let socket_ref = if protocol == IPPROTO_HIP { &self.hip } else { &self.ah };
        loop {
            let mut guard = socket_ref.writable().await?;
            match guard.try_io(|inner| send_to(inner.get_ref().as_raw_fd(), to, &datagram)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn recv_from(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
    let (len, addr) = socket::recvfrom::<SockaddrIn>(fd, buf).map_err(io::Error::from)?;
    let addr = addr.map(|a| *a.ip()).unwrap_or(Ipv4Addr::UNSPECIFIED);
    Ok((len, addr))
}

fn send_to(fd: RawFd, to: Ipv4Addr, datagram: &[u8]) -> io::Result<()> {
    let addr = SockaddrIn::from(std::net::SocketAddrV4::new(to, 0));
    socket::sendto(fd, datagram, &addr, socket::MsgFlags::empty())
        .map(|_| ())
        .map_err(io::Error::from)
}

/// Waits until either socket reports readable, returning its fd and the
/// protocol number it carries. Polls both rather than using `select!`
/// so a caller can reuse the returned fd for the actual read without a
/// second await.
async fn select_readable(hip: &AsyncFd<Socket>, ah: &AsyncFd<Socket>) -> io::Result<(RawFd, u8)> {
    tokio::select! {
        result = hip.readable() => {
            result?;
            Ok((hip.get_ref().as_raw_fd(), IPPROTO_HIP))
        }
        result = ah.readable() => {
            result?;
            Ok((ah.get_ref().as_raw_fd(), IPPROTO_AH))
        }
    }
}

/// A bridge duplex backed by an already-attached file descriptor (a TAP
/// device, a packet socket, or a test pipe) handed to the core by its
/// external supervisor. Opening and configuring the underlying device
/// is out of scope for the core; this type only performs whole-frame
/// reads and writes.
pub struct FdBridge {
    file: tokio::fs::File,
}

impl FdBridge {
    pub fn new(file: std::fs::File) -> FdBridge {
        FdBridge { file: tokio::fs::File::from_std(file) }
    }
}

#[async_trait]
impl BridgeDuplex for FdBridge {
    async fn recv(&self) -> io::Result<Bytes> {
        use tokio::io::AsyncReadExt;
        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_LEN);
        let mut file = self.file.try_clone().await?;
        let len = file.read(&mut buf).await?;
        buf.truncate(len);
        Ok(buf.freeze())
    }

    async fn send(&self, frame: Bytes) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = self.file.try_clone().await?;
        file.write_all(&frame).await
    }
}
