//! Raw SCTP socket options (Linux `<netinet/sctp.h>`)

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;

use streamio_core::{SctpConfig, StreamCounts};

pub const SOL_SCTP: libc::c_int = 132;
pub const SCTP_INITMSG: libc::c_int = 2;
pub const SCTP_STATUS: libc::c_int = 14;
pub const SCTP_GET_LOCAL_ADDRS: libc::c_int = 109;

/// Room for this many IPv6 addresses in a local address query
const MAX_LOCAL_ADDRS: usize = 64;
const SOCKADDR_IN_LEN: usize = 16;
const SOCKADDR_IN6_LEN: usize = 28;
/// `assoc_id` and `addr_num` ahead of the packed addresses
const GETADDRS_HEADER_LEN: usize = 8;

#[repr(C)]
#[derive(Debug, Default)]
struct SctpInitMsg {
    num_ostreams: u16,
    max_instreams: u16,
    max_attempts: u16,
    max_init_timeo: u16,
}

/// Leading fields of `struct sctp_status`; the trailing primary-path info
/// is kept opaque and oversized so the kernel's length check passes.
#[repr(C)]
#[allow(dead_code)]
struct SctpStatus {
    assoc_id: i32,
    state: i32,
    rwnd: u32,
    unackdata: u16,
    penddata: u16,
    instrms: u16,
    outstrms: u16,
    fragmentation_point: u32,
    primary: [u8; 256],
}

/// Request stream counts for associations created on this socket
pub fn set_initmsg(fd: RawFd, config: &SctpConfig) -> io::Result<()> {
    let msg = SctpInitMsg {
        num_ostreams: config.ostreams,
        max_instreams: config.instreams,
        ..Default::default()
    };
    // SAFETY: msg is a valid, fully initialised sctp_initmsg
    let rv = unsafe {
        libc::setsockopt(
            fd,
            SOL_SCTP,
            SCTP_INITMSG,
            &msg as *const SctpInitMsg as *const libc::c_void,
            mem::size_of::<SctpInitMsg>() as libc::socklen_t,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Negotiated stream counts of the socket's association
pub fn stream_counts(fd: RawFd) -> io::Result<StreamCounts> {
    // SAFETY: all-zero is a valid bit pattern for SctpStatus
    let mut status: SctpStatus = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SctpStatus>() as libc::socklen_t;
    // SAFETY: status and len describe a writable buffer of `len` bytes
    let rv = unsafe {
        libc::getsockopt(
            fd,
            SOL_SCTP,
            SCTP_STATUS,
            &mut status as *mut SctpStatus as *mut libc::c_void,
            &mut len,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(StreamCounts {
        instreams: status.instrms,
        ostreams: status.outstrms,
    })
}

/// Every address the socket is bound to
///
/// A wildcard bind reports each local interface address.
pub fn local_addrs(fd: RawFd) -> io::Result<Vec<SocketAddr>> {
    let mut buf = vec![0u8; GETADDRS_HEADER_LEN + MAX_LOCAL_ADDRS * SOCKADDR_IN6_LEN];
    let mut len = buf.len() as libc::socklen_t;
    // SAFETY: buf and len describe a writable buffer of `len` bytes; a zero
    // assoc_id asks for the endpoint's own bind addresses
    let rv = unsafe {
        libc::getsockopt(
            fd,
            SOL_SCTP,
            SCTP_GET_LOCAL_ADDRS,
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut len,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(len as usize);
    Ok(parse_getaddrs(&buf))
}

/// Decode a `struct sctp_getaddrs` reply
fn parse_getaddrs(buf: &[u8]) -> Vec<SocketAddr> {
    let Some(count) = buf.get(4..GETADDRS_HEADER_LEN) else {
        return Vec::new();
    };
    let count = u32::from_ne_bytes([count[0], count[1], count[2], count[3]]) as usize;
    let mut addrs = Vec::with_capacity(count);
    let mut rest = &buf[GETADDRS_HEADER_LEN..];
    while addrs.len() < count && rest.len() >= 2 {
        let family = u16::from_ne_bytes([rest[0], rest[1]]) as libc::c_int;
        let (addr, used) = match family {
            libc::AF_INET if rest.len() >= SOCKADDR_IN_LEN => {
                let port = u16::from_be_bytes([rest[2], rest[3]]);
                let ip = Ipv4Addr::new(rest[4], rest[5], rest[6], rest[7]);
                (SocketAddr::V4(SocketAddrV4::new(ip, port)), SOCKADDR_IN_LEN)
            }
            libc::AF_INET6 if rest.len() >= SOCKADDR_IN6_LEN => {
                let port = u16::from_be_bytes([rest[2], rest[3]]);
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&rest[8..24]);
                let scope = u32::from_ne_bytes([rest[24], rest[25], rest[26], rest[27]]);
                let ip = Ipv6Addr::from(octets);
                (SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope)), SOCKADDR_IN6_LEN)
            }
            _ => break,
        };
        addrs.push(addr);
        rest = &rest[used..];
    }
    addrs
}
