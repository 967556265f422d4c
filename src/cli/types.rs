use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Server vitals as reported by the `/varz` monitoring endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Varz {
    pub version: String,
    pub uptime: String,
    pub cpu: f64,
    pub mem: u64,
    pub slow_consumers: u64,
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
}

/// One connection entry from `/connz`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionRecord {
    pub cid: u64,
    pub ip: String,
    pub port: u16,
    pub name: String,
    #[serde(rename = "subscriptions")]
    pub num_subs: u32,
    #[serde(alias = "pending_size")]
    pub pending_bytes: u64,
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub lang: String,
    pub version: String,
    pub uptime: String,
    pub last_activity: String,
    #[serde(rename = "subscriptions_list")]
    pub subs: Vec<String>,
}

impl ConnectionRecord {
    pub fn remote(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Connz {
    #[serde(rename = "num_connections")]
    pub num_conns: u64,
    pub connections: Vec<ConnectionRecord>,
}

/// Per-second throughput between two consecutive polls.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateSet {
    pub in_msgs: f64,
    pub out_msgs: f64,
    pub in_bytes: f64,
    pub out_bytes: f64,
}

/// One complete read of the server. `Snapshot::default()` is the
/// placeholder painted before the first poll lands.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub varz: Varz,
    pub connz: Connz,
    pub rates: RateSet,
    pub taken_at: Option<SystemTime>,
}
