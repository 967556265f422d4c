use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::Context;
use reqwest::{Certificate, Identity};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio::time::Duration;

use crate::cli::config::{DashboardConfig, TlsOptions};
use crate::cli::sort::SortKey;
use crate::cli::types::{Connz, RateSet, Snapshot, Varz};

/// What the poller asks the server for. Built from the dashboard's config
/// and only ever read by the poller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollRequest {
    pub limit: u32,
    pub sort: SortKey,
    pub subs: bool,
    pub delay: Duration,
}

impl From<&DashboardConfig> for PollRequest {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            limit: config.sample_limit,
            sort: config.sort_key,
            subs: config.display_subs,
            delay: config.refresh,
        }
    }
}

/// Latest outcome of polling. The last good snapshot survives failed polls.
#[derive(Clone, Debug, Default)]
pub struct PollStatus {
    pub snapshot: Option<Arc<Snapshot>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

pub fn connz_url(base: &str, request: &PollRequest) -> String {
    let mut url = format!("{}/connz?limit={}&sort={}", base, request.limit, request.sort);
    if request.subs {
        url.push_str("&subs=1");
    }
    url
}

#[derive(Clone, Copy, Debug)]
struct Counters {
    in_msgs: u64,
    out_msgs: u64,
    in_bytes: u64,
    out_bytes: u64,
}

impl From<&Varz> for Counters {
    fn from(v: &Varz) -> Self {
        Self {
            in_msgs: v.in_msgs,
            out_msgs: v.out_msgs,
            in_bytes: v.in_bytes,
            out_bytes: v.out_bytes,
        }
    }
}

/// Derives per-second rates from consecutive `/varz` counters.
#[derive(Debug, Default)]
pub struct RateTracker {
    last: Option<(Instant, Counters)>,
}

impl RateTracker {
    /// Rates since the previous call; zero on the first call. A counter that
    /// went backwards (server restart) yields a zero rate.
    pub fn update(&mut self, varz: &Varz, now: Instant) -> RateSet {
        let current = Counters::from(varz);
        let rates = match self.last {
            Some((at, prev)) => {
                let secs = now.saturating_duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    let per_sec = |cur: u64, prev: u64| cur.saturating_sub(prev) as f64 / secs;
                    RateSet {
                        in_msgs: per_sec(current.in_msgs, prev.in_msgs),
                        out_msgs: per_sec(current.out_msgs, prev.out_msgs),
                        in_bytes: per_sec(current.in_bytes, prev.in_bytes),
                        out_bytes: per_sec(current.out_bytes, prev.out_bytes),
                    }
                } else {
                    RateSet::default()
                }
            }
            None => RateSet::default(),
        };
        self.last = Some((now, current));
        rates
    }
}

pub fn build_client(tls: Option<&TlsOptions>, timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(tls) = tls {
        builder = builder.use_rustls_tls();
        if let Some(ca) = &tls.ca {
            let pem = std::fs::read(ca).with_context(|| format!("reading CA bundle {}", ca.display()))?;
            let cert = Certificate::from_pem(&pem).with_context(|| format!("parsing CA bundle {}", ca.display()))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
            let mut pem = std::fs::read(cert).with_context(|| format!("reading client cert {}", cert.display()))?;
            pem.push(b'\n');
            pem.extend(std::fs::read(key).with_context(|| format!("reading client key {}", key.display()))?);
            let identity = Identity::from_pem(&pem).context("loading client certificate and key")?;
            builder = builder.identity(identity);
        }
        if tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }
    Ok(builder.build()?)
}

/// Client for a NATS monitoring endpoint.
pub struct Engine {
    client: reqwest::Client,
    uri: String,
    rates: RateTracker,
}

impl Engine {
    pub fn new(uri: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            uri: uri.into(),
            rates: RateTracker::default(),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("{} returned status {}", url, resp.status());
        }
        let v: T = resp.json().await.with_context(|| format!("decoding {url}"))?;
        Ok(v)
    }

    pub async fn fetch_varz(&self) -> anyhow::Result<Varz> {
        self.fetch_json(&format!("{}/varz", self.uri)).await
    }

    pub async fn fetch_connz(&self, request: &PollRequest) -> anyhow::Result<Connz> {
        self.fetch_json(&connz_url(&self.uri, request)).await
    }

    /// One complete poll: server vitals, connections and rates.
    pub async fn snapshot(&mut self, request: &PollRequest) -> anyhow::Result<Snapshot> {
        let varz = self.fetch_varz().await?;
        let connz = self.fetch_connz(request).await?;
        let rates = self.rates.update(&varz, Instant::now());
        Ok(Snapshot {
            varz,
            connz,
            rates,
            taken_at: Some(SystemTime::now()),
        })
    }

    /// Poll until shutdown is signalled or nobody is listening any more.
    /// Each tick reads the current request so limit, sort and subscription
    /// changes apply from the next poll on.
    pub async fn monitor(
        mut self,
        requests: watch::Receiver<PollRequest>,
        feed: watch::Sender<PollStatus>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        log::info!("polling {}", self.uri);
        loop {
            let request = requests.borrow().clone();
            let outcome = tokio::select! {
                _ = shutdown.recv() => break,
                outcome = self.snapshot(&request) => outcome,
            };

            match outcome {
                Ok(snapshot) => {
                    log::debug!(
                        "poll ok: {} of {} connections",
                        snapshot.connz.connections.len(),
                        snapshot.connz.num_conns
                    );
                    feed.send_modify(|status| {
                        status.snapshot = Some(Arc::new(snapshot));
                        status.consecutive_failures = 0;
                        status.last_error = None;
                    });
                }
                Err(e) => {
                    log::warn!("poll failed: {e:#}");
                    feed.send_modify(|status| {
                        status.consecutive_failures += 1;
                        status.last_error = Some(format!("{e:#}"));
                    });
                }
            }

            if feed.is_closed() {
                break;
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(request.delay) => {}
            }
        }
        log::info!("poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varz(in_msgs: u64, out_bytes: u64) -> Varz {
        Varz {
            in_msgs,
            out_bytes,
            ..Default::default()
        }
    }

    #[test]
    fn connz_url_carries_limit_sort_and_subs() {
        let mut request = PollRequest::from(&DashboardConfig::default());
        assert_eq!(
            connz_url("http://127.0.0.1:8222", &request),
            "http://127.0.0.1:8222/connz?limit=1024&sort=cid"
        );
        request.limit = 5;
        request.sort = SortKey::BytesFrom;
        request.subs = true;
        assert_eq!(
            connz_url("https://h:8443", &request),
            "https://h:8443/connz?limit=5&sort=bytes_from&subs=1"
        );
    }

    #[test]
    fn first_poll_has_zero_rates() {
        let mut tracker = RateTracker::default();
        assert_eq!(tracker.update(&varz(100, 100), Instant::now()), RateSet::default());
    }

    #[test]
    fn rates_are_per_second_deltas() {
        let mut tracker = RateTracker::default();
        let start = Instant::now();
        tracker.update(&varz(100, 1000), start);
        let rates = tracker.update(&varz(300, 5000), start + Duration::from_secs(2));
        assert_eq!(rates.in_msgs, 100.0);
        assert_eq!(rates.out_bytes, 2000.0);
        assert_eq!(rates.out_msgs, 0.0);
    }

    #[test]
    fn counter_reset_gives_zero_rate() {
        let mut tracker = RateTracker::default();
        let start = Instant::now();
        tracker.update(&varz(500, 500), start);
        let rates = tracker.update(&varz(10, 10), start + Duration::from_secs(1));
        assert_eq!(rates.in_msgs, 0.0);
        assert_eq!(rates.out_bytes, 0.0);
    }

    #[test]
    fn plain_client_builds_without_tls() {
        assert!(build_client(None, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn missing_ca_file_is_fatal() {
        let tls = TlsOptions {
            ca: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        let err = build_client(Some(&tls), Duration::from_secs(1)).unwrap_err();
        assert!(format!("{err:#}").contains("reading CA bundle"));
    }
}
