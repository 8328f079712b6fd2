//! Prometheus adapter for stratum bridge metrics
//!
//! Three instant queries over the lookback window `W`:
//!
//! | Query                                                          | Yields            |
//! |----------------------------------------------------------------|-------------------|
//! | `sum(increase(ks_valid_share_counter[Ws])) by (wallet, worker)` | valid shares      |
//! | `sum(increase(ks_valid_share_diff_counter[Ws])) by (wallet, worker)` | total difficulty |
//! | `ks_miner_uptime_seconds[Ws]`                                  | worker start time |
//!
//! The uptime gauge holds the Unix time the worker came online; it is turned
//! into the fraction of the window the worker has been up.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::http::{HttpSecurityConfig, SecureHttpClient};
use crate::config::TelemetryConfig;
use crate::telemetry::{TelemetryError, TelemetrySource, WorkerSample};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// One `(wallet, worker) → value` point
#[derive(Debug, Clone, PartialEq)]
struct SeriesPoint {
    wallet: String,
    worker: String,
    value: f64,
}

/// Fraction of the window a worker started at `start` has been up at `now`
pub fn uptime_fraction(start: f64, now: f64, window_secs: f64) -> f64 {
    if !start.is_finite() || window_secs <= 0.0 || start > now {
        return 0.0;
    }
    if start <= now - window_secs {
        return 1.0;
    }
    ((now - start) / window_secs).clamp(0.0, 1.0)
}

pub struct PrometheusTelemetry {
    http: SecureHttpClient,
    query_url: String,
    window: Duration,
    pool_owner_wallet: Option<String>,
}

impl PrometheusTelemetry {
    pub fn new(config: &TelemetryConfig, require_https: bool) -> anyhow::Result<Self> {
        let http = SecureHttpClient::new(HttpSecurityConfig {
            require_https,
            timeout_secs: config.fetch_timeout_secs,
            allowed_domains: config.allowed_hosts.clone(),
            ..Default::default()
        })?;

        let query_url = format!("{}/api/v1/query", config.endpoint.trim_end_matches('/'));
        http.validate_url(&query_url)?;

        Ok(Self {
            http,
            query_url,
            window: Duration::from_secs(config.window_secs),
            pool_owner_wallet: config.pool_owner_wallet.clone(),
        })
    }

    fn range(&self) -> String {
        format!("{}s", self.window.as_secs())
    }

    async fn query(&self, promql: &str) -> Result<Vec<SeriesPoint>, TelemetryError> {
        let response: QueryResponse = self
            .http
            .get_json(&self.query_url, &[("query", promql)])
            .await
            .map_err(|e| TelemetryError::Unreachable(format!("{:#}", e)))?;

        parse_response(response)
    }
}

fn parse_response(response: QueryResponse) -> Result<Vec<SeriesPoint>, TelemetryError> {
    if response.status != "success" {
        return Err(TelemetryError::QueryFailed(
            response.error.unwrap_or_else(|| response.status.clone()),
        ));
    }

    let data = response
        .data
        .ok_or_else(|| TelemetryError::Malformed("missing data section".to_string()))?;

    let mut points = Vec::with_capacity(data.result.len());
    for series in data.result {
        let (Some(wallet), Some(worker)) = (series.metric.get("wallet"), series.metric.get("worker"))
        else {
            continue;
        };

        // Instant vectors carry `value`; range vectors carry `values`, use the latest
        let raw = match (&series.value, series.values.last()) {
            (Some((_, v)), _) => v,
            (None, Some((_, v))) => v,
            (None, None) => continue,
        };

        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => points.push(SeriesPoint {
                wallet: wallet.clone(),
                worker: worker.clone(),
                value,
            }),
            _ => warn!(worker = %worker, value = %raw, "Dropping malformed telemetry value"),
        }
    }

    Ok(points)
}

#[derive(Default)]
struct Accumulator {
    shares: f64,
    total_difficulty: f64,
    earliest_start: Option<f64>,
}

/// Combine the three series into samples for the requested workers
fn assemble_samples(
    valid_shares: Vec<SeriesPoint>,
    total_difficulty: Vec<SeriesPoint>,
    start_times: Vec<SeriesPoint>,
    requested: &HashSet<&str>,
    pool_owner_wallet: Option<&str>,
    now: f64,
    window_secs: f64,
) -> HashMap<String, WorkerSample> {
    let keep = |point: &SeriesPoint| {
        requested.contains(point.worker.as_str())
            && pool_owner_wallet.is_none_or(|wallet| point.wallet == wallet)
    };

    // A worker reporting under several wallets is summed across them
    let mut workers: HashMap<String, Accumulator> = HashMap::new();
    for point in valid_shares.into_iter().filter(|p| keep(p)) {
        workers.entry(point.worker).or_default().shares += point.value;
    }
    for point in total_difficulty.into_iter().filter(|p| keep(p)) {
        if let Some(acc) = workers.get_mut(&point.worker) {
            acc.total_difficulty += point.value;
        }
    }
    for point in start_times.into_iter().filter(|p| keep(p)) {
        if let Some(acc) = workers.get_mut(&point.worker) {
            acc.earliest_start = Some(acc.earliest_start.map_or(point.value, |s| s.min(point.value)));
        }
    }

    workers
        .into_iter()
        .map(|(worker, acc)| {
            let shares = acc.shares.floor() as u64;
            let difficulty = if shares > 0 {
                acc.total_difficulty / shares as f64
            } else {
                0.0
            };
            let uptime = acc
                .earliest_start
                .map_or(0.0, |start| uptime_fraction(start, now, window_secs));
            let sample = WorkerSample::new(worker.clone(), shares, difficulty, uptime);
            (worker, sample)
        })
        .collect()
}

#[async_trait]
impl TelemetrySource for PrometheusTelemetry {
    async fn fetch_samples(
        &self,
        worker_names: &[String],
    ) -> Result<HashMap<String, WorkerSample>, TelemetryError> {
        if worker_names.is_empty() {
            return Ok(HashMap::new());
        }

        let range = self.range();
        let shares_query = format!(
            "sum(increase(ks_valid_share_counter[{}])) by (wallet, worker)",
            range
        );
        let difficulty_query = format!(
            "sum(increase(ks_valid_share_diff_counter[{}])) by (wallet, worker)",
            range
        );
        let uptime_query = format!("ks_miner_uptime_seconds[{}]", range);

        let (shares, difficulty, starts) = tokio::try_join!(
            self.query(&shares_query),
            self.query(&difficulty_query),
            self.query(&uptime_query),
        )?;

        let requested: HashSet<&str> = worker_names.iter().map(String::as_str).collect();
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let samples = assemble_samples(
            shares,
            difficulty,
            starts,
            &requested,
            self.pool_owner_wallet.as_deref(),
            now,
            self.window.as_secs_f64(),
        );

        debug!(
            requested = worker_names.len(),
            sampled = samples.len(),
            "Telemetry fetched"
        );
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Vec<SeriesPoint>, TelemetryError> {
        parse_response(serde_json::from_str(json).unwrap())
    }

    fn point(wallet: &str, worker: &str, value: f64) -> SeriesPoint {
        SeriesPoint {
            wallet: wallet.to_string(),
            worker: worker.to_string(),
            value,
        }
    }

    #[test]
    fn test_uptime_fraction_edges() {
        let now = 10_000.0;
        assert_eq!(uptime_fraction(now + 5.0, now, 3600.0), 0.0);
        assert_eq!(uptime_fraction(now - 3600.0, now, 3600.0), 1.0);
        assert_eq!(uptime_fraction(0.0, now, 3600.0), 1.0);
        assert!((uptime_fraction(now - 1800.0, now, 3600.0) - 0.5).abs() < 1e-12);
        assert_eq!(uptime_fraction(f64::NAN, now, 3600.0), 0.0);
    }

    #[test]
    fn test_parse_instant_and_range_vectors() {
        let instant = parse(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"wallet":"w1","worker":"a"},"value":[1700000000.1,"42.9"]},
                {"metric":{"worker":"no-wallet"},"value":[1700000000.1,"1"]}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(instant, vec![point("w1", "a", 42.9)]);

        let range = parse(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{"wallet":"w1","worker":"a"},"values":[[1,"100"],[2,"250"]]}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(range, vec![point("w1", "a", 250.0)]);
    }

    #[test]
    fn test_malformed_values_dropped() {
        let points = parse(
            r#"{"status":"success","data":{"result":[
                {"metric":{"wallet":"w","worker":"nan"},"value":[1,"NaN"]},
                {"metric":{"wallet":"w","worker":"neg"},"value":[1,"-3"]},
                {"metric":{"wallet":"w","worker":"junk"},"value":[1,"abc"]},
                {"metric":{"wallet":"w","worker":"ok"},"value":[1,"3"]}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(points, vec![point("w", "ok", 3.0)]);
    }

    #[test]
    fn test_error_status_is_query_failure() {
        let err = parse(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .unwrap_err();
        assert!(matches!(err, TelemetryError::QueryFailed(msg) if msg == "parse error"));
    }

    #[test]
    fn test_assemble_filters_and_derives_difficulty() {
        let requested: HashSet<&str> = ["a", "b", "c"].into_iter().collect();
        let now = 10_000.0;
        let samples = assemble_samples(
            vec![
                point("pool", "a", 10.7),
                point("pool", "b", 0.0),
                point("other", "c", 5.0),
                point("pool", "unrequested", 9.0),
            ],
            vec![point("pool", "a", 500.0), point("other", "c", 50.0)],
            vec![point("pool", "a", now - 1800.0)],
            &requested,
            Some("pool"),
            now,
            3600.0,
        );

        assert_eq!(samples.len(), 2);
        let a = &samples["a"];
        assert_eq!(a.valid_shares, 10);
        assert!((a.effective_work() - 500.0).abs() < 1e-9);
        assert!((a.uptime_fraction - 0.5).abs() < 1e-9);

        let b = &samples["b"];
        assert_eq!(b.valid_shares, 0);
        assert_eq!(b.difficulty, 0.0);
        assert_eq!(b.uptime_fraction, 0.0);
    }

    #[test]
    fn test_assemble_without_wallet_filter_sums_wallets() {
        let requested: HashSet<&str> = ["a"].into_iter().collect();
        let samples = assemble_samples(
            vec![point("w1", "a", 4.0), point("w2", "a", 6.0)],
            vec![point("w1", "a", 40.0), point("w2", "a", 60.0)],
            vec![point("w1", "a", 100.0), point("w2", "a", 50.0)],
            &requested,
            None,
            200.0,
            100.0,
        );

        let a = &samples["a"];
        assert_eq!(a.valid_shares, 10);
        assert!((a.effective_work() - 100.0).abs() < 1e-9);
        assert_eq!(a.uptime_fraction, 1.0);
    }
}
