use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::SubtestKind;

// ─── Measurement frames ──────────────────────────────────────────

/// One sample of a subtest, sent to the client as a text frame.
///
/// Only the first measurement of a subtest carries `connection_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "ConnectionInfo", default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<ConnectionInfo>,

    /// Seconds since the collector started sampling.
    #[serde(rename = "Elapsed", default)]
    pub elapsed: f64,

    #[serde(rename = "BBRInfo", default, skip_serializing_if = "Option::is_none")]
    pub bbr_info: Option<BbrInfo>,

    #[serde(rename = "TCPInfo", default, skip_serializing_if = "Option::is_none")]
    pub tcp_info: Option<TcpInfo>,
}

/// Identity of the transport endpoints and of the subtest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "Client")]
    pub client: String,
    #[serde(rename = "Server")]
    pub server: String,
    #[serde(rename = "UUID")]
    pub uuid: String,
}

/// Congestion-control estimates exported by BBR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BbrInfo {
    /// Max-filtered bandwidth estimate, bytes per second.
    #[serde(rename = "BW")]
    pub bw: i64,
    /// Min-filtered round trip time, microseconds.
    #[serde(rename = "MinRTT")]
    pub min_rtt: i64,
}

/// Kernel TCP statistics for the connection. Times are microseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TcpInfo {
    pub state: u8,
    #[serde(rename = "CAState")]
    pub ca_state: u8,
    pub retransmits: u8,
    pub probes: u8,
    pub backoff: u8,
    pub options: u8,
    #[serde(rename = "WScale")]
    pub wscale: u8,
    pub app_limited: u8,

    #[serde(rename = "RTO")]
    pub rto: u32,
    #[serde(rename = "ATO")]
    pub ato: u32,
    #[serde(rename = "SndMSS")]
    pub snd_mss: u32,
    #[serde(rename = "RcvMSS")]
    pub rcv_mss: u32,

    pub unacked: u32,
    pub sacked: u32,
    pub lost: u32,
    pub retrans: u32,
    pub fackets: u32,

    pub last_data_sent: u32,
    pub last_ack_sent: u32,
    pub last_data_recv: u32,
    pub last_ack_recv: u32,

    #[serde(rename = "PMTU")]
    pub pmtu: u32,
    pub rcv_ss_thresh: u32,
    #[serde(rename = "RTT")]
    pub rtt: u32,
    #[serde(rename = "RTTVar")]
    pub rtt_var: u32,
    pub snd_ss_thresh: u32,
    pub snd_cwnd: u32,
    #[serde(rename = "AdvMSS")]
    pub adv_mss: u32,
    pub reordering: u32,

    #[serde(rename = "RcvRTT")]
    pub rcv_rtt: u32,
    pub rcv_space: u32,
    pub total_retrans: u32,

    pub pacing_rate: u64,
    pub max_pacing_rate: u64,
    pub bytes_acked: u64,
    pub bytes_received: u64,
    pub segs_out: u32,
    pub segs_in: u32,

    pub notsent_bytes: u32,
    #[serde(rename = "MinRTT")]
    pub min_rtt: u32,
    pub data_segs_in: u32,
    pub data_segs_out: u32,

    pub delivery_rate: u64,
    pub busy_time: u64,
    #[serde(rename = "RWndLimited")]
    pub rwnd_limited: u64,
    pub snd_buf_limited: u64,

    pub delivered: u32,
    #[serde(rename = "DeliveredCE")]
    pub delivered_ce: u32,

    pub bytes_sent: u64,
    pub bytes_retrans: u64,
    #[serde(rename = "DSackDups")]
    pub dsack_dups: u32,
    pub reord_seen: u32,
    pub rcv_ooo_pack: u32,
    pub snd_wnd: u32,
}

// ─── Archival record ─────────────────────────────────────────────

/// Everything kept about one subtest once it is over.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchivalData {
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub subtest: SubtestKind,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Measurements successfully written to the client, in send order.
    pub server_measurements: Vec<Measurement>,
    /// Measurements the client reported back to us.
    pub client_measurements: Vec<Measurement>,
}

impl ArchivalData {
    pub fn new(uuid: String, subtest: SubtestKind) -> Self {
        Self {
            uuid,
            subtest,
            start_time: None,
            end_time: None,
            server_measurements: Vec::new(),
            client_measurements: Vec::new(),
        }
    }

    /// Sets `start_time` now and returns a guard that sets `end_time` when
    /// dropped, whichever way the holder exits.
    pub fn stamp(&mut self) -> Stamped<'_> {
        self.start_time = Some(Utc::now());
        Stamped(self)
    }
}

pub struct Stamped<'a>(&'a mut ArchivalData);

impl Deref for Stamped<'_> {
    type Target = ArchivalData;

    fn deref(&self) -> &ArchivalData {
        self.0
    }
}

impl DerefMut for Stamped<'_> {
    fn deref_mut(&mut self) -> &mut ArchivalData {
        self.0
    }
}

impl Drop for Stamped<'_> {
    fn drop(&mut self) {
        self.0.end_time = Some(Utc::now());
    }
}
