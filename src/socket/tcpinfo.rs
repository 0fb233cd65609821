//! `TCP_INFO` snapshots.

use socket2::Socket;

use crate::error::Error;
use crate::model::TcpInfo;

/// Mirror of the kernel's `struct tcp_info` (include/uapi/linux/tcp.h).
///
/// Older kernels fill a prefix of it and leave the rest zeroed.
#[cfg(target_os = "linux")]
#[repr(C)]
#[derive(Debug, Default)]
struct RawTcpInfo {
    state: u8,
    ca_state: u8,
    retransmits: u8,
    probes: u8,
    backoff: u8,
    options: u8,
    wscale: u8,
    app_limited: u8,

    rto: u32,
    ato: u32,
    snd_mss: u32,
    rcv_mss: u32,

    unacked: u32,
    sacked: u32,
    lost: u32,
    retrans: u32,
    fackets: u32,

    last_data_sent: u32,
    last_ack_sent: u32,
    last_data_recv: u32,
    last_ack_recv: u32,

    pmtu: u32,
    rcv_ssthresh: u32,
    rtt: u32,
    rttvar: u32,
    snd_ssthresh: u32,
    snd_cwnd: u32,
    advmss: u32,
    reordering: u32,

    rcv_rtt: u32,
    rcv_space: u32,

    total_retrans: u32,

    pacing_rate: u64,
    max_pacing_rate: u64,
    bytes_acked: u64,
    bytes_received: u64,
    segs_out: u32,
    segs_in: u32,

    notsent_bytes: u32,
    min_rtt: u32,
    data_segs_in: u32,
    data_segs_out: u32,

    delivery_rate: u64,

    busy_time: u64,
    rwnd_limited: u64,
    sndbuf_limited: u64,

    delivered: u32,
    delivered_ce: u32,

    bytes_sent: u64,
    bytes_retrans: u64,
    dsack_dups: u32,
    reord_seen: u32,

    rcv_ooopack: u32,
    snd_wnd: u32,
}

#[cfg(target_os = "linux")]
impl From<RawTcpInfo> for TcpInfo {
    fn from(raw: RawTcpInfo) -> Self {
        Self {
            state: raw.state,
            ca_state: raw.ca_state,
            retransmits: raw.retransmits,
            probes: raw.probes,
            backoff: raw.backoff,
            options: raw.options,
            wscale: raw.wscale,
            app_limited: raw.app_limited,
            rto: raw.rto,
            ato: raw.ato,
            snd_mss: raw.snd_mss,
            rcv_mss: raw.rcv_mss,
            unacked: raw.unacked,
            sacked: raw.sacked,
            lost: raw.lost,
            retrans: raw.retrans,
            fackets: raw.fackets,
            last_data_sent: raw.last_data_sent,
            last_ack_sent: raw.last_ack_sent,
            last_data_recv: raw.last_data_recv,
            last_ack_recv: raw.last_ack_recv,
            pmtu: raw.pmtu,
            rcv_ss_thresh: raw.rcv_ssthresh,
            rtt: raw.rtt,
            rtt_var: raw.rttvar,
            snd_ss_thresh: raw.snd_ssthresh,
            snd_cwnd: raw.snd_cwnd,
            adv_mss: raw.advmss,
            reordering: raw.reordering,
            rcv_rtt: raw.rcv_rtt,
            rcv_space: raw.rcv_space,
            total_retrans: raw.total_retrans,
            pacing_rate: raw.pacing_rate,
            max_pacing_rate: raw.max_pacing_rate,
            bytes_acked: raw.bytes_acked,
            bytes_received: raw.bytes_received,
            segs_out: raw.segs_out,
            segs_in: raw.segs_in,
            notsent_bytes: raw.notsent_bytes,
            min_rtt: raw.min_rtt,
            data_segs_in: raw.data_segs_in,
            data_segs_out: raw.data_segs_out,
            delivery_rate: raw.delivery_rate,
            busy_time: raw.busy_time,
            rwnd_limited: raw.rwnd_limited,
            snd_buf_limited: raw.sndbuf_limited,
            delivered: raw.delivered,
            delivered_ce: raw.delivered_ce,
            bytes_sent: raw.bytes_sent,
            bytes_retrans: raw.bytes_retrans,
            dsack_dups: raw.dsack_dups,
            reord_seen: raw.reord_seen,
            rcv_ooo_pack: raw.rcv_ooopack,
            snd_wnd: raw.snd_wnd,
        }
    }
}

#[cfg(target_os = "linux")]
pub fn get(sock: &Socket) -> Result<TcpInfo, Error> {
    use std::io;
    use std::mem::size_of;
    use std::os::fd::AsRawFd;

    let mut raw = RawTcpInfo::default();
    let mut len = size_of::<RawTcpInfo>() as libc::socklen_t;
    // SAFETY: `raw` is a zeroed plain-old-data buffer of `len` bytes; the
    // kernel copies at most `len` bytes into it.
    let rc = unsafe {
        libc::getsockopt(
            sock.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            (&mut raw as *mut RawTcpInfo).cast(),
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(raw.into())
}

#[cfg(not(target_os = "linux"))]
pub fn get(_sock: &Socket) -> Result<TcpInfo, Error> {
    Err(Error::Unsupported)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    const TCP_ESTABLISHED: u8 = 1;

    #[test]
    fn reads_established_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server, _) = listener.accept().unwrap();

        let info = get(&Socket::from(client)).unwrap();
        assert_eq!(info.state, TCP_ESTABLISHED);
        assert!(info.snd_mss > 0);
    }

    #[test]
    fn layout_matches_kernel_offsets() {
        use std::mem::{offset_of, size_of};
        assert_eq!(offset_of!(RawTcpInfo, rto), 8);
        assert_eq!(offset_of!(RawTcpInfo, total_retrans), 100);
        assert_eq!(offset_of!(RawTcpInfo, pacing_rate), 104);
        assert_eq!(size_of::<RawTcpInfo>(), 232);
    }
}
