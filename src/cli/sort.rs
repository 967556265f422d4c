use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::cli::types::ConnectionRecord;

/// Keys the dashboard can order connections by. The token of each key is
/// also what the monitoring endpoint accepts as its `sort` parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SortKey {
    #[default]
    Cid,
    Subs,
    Pending,
    MsgsTo,
    MsgsFrom,
    BytesTo,
    BytesFrom,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a valid option to sort by: {0}")]
pub struct UnknownSortKey(pub String);

impl SortKey {
    pub const ALL: [SortKey; 7] = [
        SortKey::Cid,
        SortKey::Subs,
        SortKey::Pending,
        SortKey::MsgsTo,
        SortKey::MsgsFrom,
        SortKey::BytesTo,
        SortKey::BytesFrom,
    ];

    pub fn token(self) -> &'static str {
        match self {
            SortKey::Cid => "cid",
            SortKey::Subs => "subs",
            SortKey::Pending => "pending",
            SortKey::MsgsTo => "msgs_to",
            SortKey::MsgsFrom => "msgs_from",
            SortKey::BytesTo => "bytes_to",
            SortKey::BytesFrom => "bytes_from",
        }
    }

    /// Ordering of two connections under this key. Connection ids ascend,
    /// every counter descends so the busiest connections come first.
    pub fn compare(self, a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
        match self {
            SortKey::Cid => a.cid.cmp(&b.cid),
            SortKey::Subs => b.num_subs.cmp(&a.num_subs),
            SortKey::Pending => b.pending_bytes.cmp(&a.pending_bytes),
            SortKey::MsgsTo => b.out_msgs.cmp(&a.out_msgs),
            SortKey::MsgsFrom => b.in_msgs.cmp(&a.in_msgs),
            SortKey::BytesTo => b.out_bytes.cmp(&a.out_bytes),
            SortKey::BytesFrom => b.in_bytes.cmp(&a.in_bytes),
        }
    }

    /// Stable sort, so equal keys keep the order the server returned.
    pub fn sort<'a>(self, conns: &'a [ConnectionRecord]) -> Vec<&'a ConnectionRecord> {
        let mut rows: Vec<&ConnectionRecord> = conns.iter().collect();
        rows.sort_by(|a, b| self.compare(a, b));
        rows
    }
}

impl FromStr for SortKey {
    type Err = UnknownSortKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortKey::ALL
            .into_iter()
            .find(|k| k.token() == s)
            .ok_or_else(|| UnknownSortKey(s.to_string()))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
