//! BBR congestion control: switching a socket to it and reading its
//! bandwidth and RTT estimates.

use socket2::Socket;

use crate::error::Error;
use crate::model::BbrInfo;

/// Name of the congestion-control module, as understood by the kernel.
const CONGESTION_CONTROL: &[u8] = b"bbr";

#[cfg(target_os = "linux")]
pub fn enable(sock: &Socket) -> Result<(), Error> {
    sock.set_tcp_congestion(CONGESTION_CONTROL)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn enable(_sock: &Socket) -> Result<(), Error> {
    let _ = CONGESTION_CONTROL;
    Err(Error::Unsupported)
}

#[cfg(target_os = "linux")]
pub fn max_bandwidth_and_min_rtt(sock: &Socket) -> Result<BbrInfo, Error> {
    use std::io;
    use std::mem::size_of;
    use std::os::fd::AsRawFd;

    // From include/uapi/linux/inet_diag.h.
    const TCP_CC_INFO: libc::c_int = 26;

    /// `struct tcp_bbr_info`. It is the only member of `union tcp_cc_info`
    /// that is five words long, which is how BBR is told apart from Vegas
    /// and DCTCP.
    #[repr(C)]
    #[derive(Default)]
    struct RawBbrInfo {
        bw_lo: u32,
        bw_hi: u32,
        min_rtt: u32,
        pacing_gain: u32,
        cwnd_gain: u32,
    }

    let mut raw = RawBbrInfo::default();
    let mut len = size_of::<RawBbrInfo>() as libc::socklen_t;
    // SAFETY: `raw` is a plain-old-data buffer of `len` bytes that outlives
    // the call; the kernel writes at most `len` bytes into it.
    let rc = unsafe {
        libc::getsockopt(
            sock.as_raw_fd(),
            libc::IPPROTO_TCP,
            TCP_CC_INFO,
            (&mut raw as *mut RawBbrInfo).cast(),
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error().into());
    }
    if len as usize != size_of::<RawBbrInfo>() {
        return Err(Error::NotBbr);
    }

    let bw = (u64::from(raw.bw_hi) << 32) | u64::from(raw.bw_lo);
    Ok(BbrInfo {
        bw: i64::try_from(bw).unwrap_or(i64::MAX),
        min_rtt: i64::from(raw.min_rtt),
    })
}

#[cfg(not(target_os = "linux"))]
pub fn max_bandwidth_and_min_rtt(_sock: &Socket) -> Result<BbrInfo, Error> {
    Err(Error::Unsupported)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn cubic_socket_is_not_reported_as_bbr() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let sock = Socket::from(stream);
        if sock.set_tcp_congestion(b"cubic").is_err() {
            return;
        }
        assert!(max_bandwidth_and_min_rtt(&sock).is_err());
    }
}
