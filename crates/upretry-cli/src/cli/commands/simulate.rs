//! Simulate command: replay upstream failures through a retry state.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Response};
use serde::Serialize;
use tokio::sync::oneshot;
use upretry_core::cluster::{ClusterInfo, ClusterStatsSnapshot, ResourcePriority};
use upretry_core::config::UpretryConfig;
use upretry_core::retry::{
    RandomSource, ResetReason, RetryContext, RetryState, RetryStatus, SequenceRandom, ThreadRandom,
};
use upretry_core::timer::{ManualTimer, RetryTimer, TokioRetryTimer};

/// One upstream failure fed to the retry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Reset(ResetReason),
    Response {
        status: u16,
        headers: Vec<(String, String)>,
    },
}

fn parse_reset_reason(s: &str) -> Option<ResetReason> {
    Some(match s {
        "local-reset" => ResetReason::LocalReset,
        "local-refused-stream" => ResetReason::LocalRefusedStreamReset,
        "connect-failure" => ResetReason::ConnectionFailure,
        "connection-termination" => ResetReason::ConnectionTermination,
        "overflow" => ResetReason::Overflow,
        "remote-reset" => ResetReason::RemoteReset,
        "remote-refused-stream" => ResetReason::RemoteRefusedStreamReset,
        _ => return None,
    })
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("expected reset:<reason> or status:<code>, got `{}`", s))?;
        match kind {
            "reset" => parse_reset_reason(rest)
                .map(Signal::Reset)
                .ok_or_else(|| format!("unknown reset reason `{}`", rest)),
            "status" => {
                let mut parts = rest.split(',');
                let code = parts.next().unwrap_or_default();
                let status: u16 = code
                    .parse()
                    .map_err(|_| format!("invalid status code `{}`", code))?;
                let headers = parts
                    .map(|kv| {
                        kv.split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .ok_or_else(|| format!("expected name=value, got `{}`", kv))
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Signal::Response { status, headers })
            }
            other => Err(format!("unknown signal kind `{}`", other)),
        }
    }
}

fn build_response(status: u16, headers: &[(String, String)]) -> Result<Response<()>> {
    let mut b = Response::builder().status(status);
    for (k, v) in headers {
        b = b.header(k.as_str(), v.as_str());
    }
    Ok(b.body(())?)
}

impl Signal {
    fn label(&self) -> String {
        match self {
            Signal::Reset(reason) => format!("reset: {}", reason),
            Signal::Response { status, .. } => format!("status: {}", status),
        }
    }
}

/// Options for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
    pub cluster: String,
    pub headers: Vec<String>,
    pub random: Vec<u64>,
    pub high_priority: bool,
    pub wait: bool,
}

#[derive(Debug, Serialize)]
struct Decision {
    signal: String,
    status: String,
    delay_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Report {
    enabled: bool,
    decisions: Vec<Decision>,
    stats: ClusterStatsSnapshot,
}

pub(crate) fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for h in raw {
        let (name, value) = h
            .split_once('=')
            .ok_or_else(|| anyhow!("header must be NAME=VALUE, got `{}`", h))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name `{}`", name))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value for `{}`", name))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Run `signals` through a fresh retry state and print a JSON report.
pub async fn run_simulate(
    cfg: &UpretryConfig,
    opts: &SimulateOptions,
    signals: &[Signal],
) -> Result<()> {
    let report = simulate(cfg, opts, signals).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn simulate(cfg: &UpretryConfig, opts: &SimulateOptions, signals: &[Signal]) -> Result<Report> {
    let policy = cfg.retry_policy()?;
    let runtime = cfg.runtime();
    let cluster: Arc<ClusterInfo> = match cfg.clusters().remove(&opts.cluster) {
        Some(c) => c,
        None if opts.cluster == "default" => Arc::new(ClusterInfo::default()),
        None => bail!("unknown cluster `{}`", opts.cluster),
    };
    let mut request_headers = parse_headers(&opts.headers)?;

    let random: Box<dyn RandomSource> = if opts.random.is_empty() {
        Box::new(ThreadRandom)
    } else {
        Box::new(SequenceRandom::new(opts.random.clone()))
    };
    let manual = ManualTimer::new();
    let timer: Box<dyn RetryTimer> = if opts.wait {
        Box::new(TokioRetryTimer::try_current().context("no tokio runtime")?)
    } else {
        Box::new(manual.clone())
    };
    let priority = if opts.high_priority {
        ResourcePriority::High
    } else {
        ResourcePriority::Default
    };

    let state = RetryState::create(
        &policy,
        &mut request_headers,
        RetryContext {
            cluster: Arc::clone(&cluster),
            priority,
            runtime: &runtime,
            random,
            timer,
        },
    );
    let Some(mut state) = state else {
        tracing::info!("no retry triggers apply; retries disabled");
        return Ok(Report {
            enabled: false,
            decisions: Vec::new(),
            stats: cluster.snapshot(),
        });
    };

    let mut decisions = Vec::with_capacity(signals.len());
    for signal in signals {
        let (tx, rx) = oneshot::channel();
        let started = tokio::time::Instant::now();
        let callback = move || {
            let _ = tx.send(());
        };
        let status = match signal {
            Signal::Reset(reason) => state.should_retry_reset(*reason, callback),
            Signal::Response { status, headers } => {
                let resp = build_response(*status, headers)?;
                state.should_retry_headers(&resp, callback)
            }
        };

        let mut delay_ms = None;
        if status == RetryStatus::Yes {
            if opts.wait {
                rx.await.context("retry timer cancelled")?;
                delay_ms = Some(started.elapsed().as_millis() as u64);
            } else {
                delay_ms = manual.last_delay().map(|d| d.as_millis() as u64);
                manual.fire();
            }
        }
        decisions.push(Decision {
            signal: signal.label(),
            status: format!("{:?}", status),
            delay_ms,
        });
    }

    drop(state);
    Ok(Report {
        enabled: true,
        decisions,
        stats: cluster.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(raw: &[&str]) -> Vec<Signal> {
        raw.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn parse_signals() {
        assert_eq!(
            "reset:connect-failure".parse::<Signal>(),
            Ok(Signal::Reset(ResetReason::ConnectionFailure))
        );
        assert_eq!(
            "status:200,grpc-status=8".parse::<Signal>(),
            Ok(Signal::Response {
                status: 200,
                headers: vec![("grpc-status".to_string(), "8".to_string())],
            })
        );
        assert!("reset:meteor".parse::<Signal>().is_err());
        assert!("status:abc".parse::<Signal>().is_err());
        assert!("bogus".parse::<Signal>().is_err());
    }

    #[test]
    fn parse_headers_rejects_missing_equals() {
        assert!(parse_headers(&["x-envoy-retry-on".to_string()]).is_err());
        let h = parse_headers(&["x-envoy-max-retries=2".to_string()]).unwrap();
        assert_eq!(h.get("x-envoy-max-retries").unwrap(), "2");
    }

    #[tokio::test]
    async fn simulate_connect_failures_with_fixed_jitter() {
        let mut cfg = UpretryConfig::default();
        cfg.retry.retry_on = "connect-failure".to_string();
        cfg.retry.num_retries = 3;
        let opts = SimulateOptions {
            cluster: "default".to_string(),
            random: vec![49, 149, 349],
            ..SimulateOptions::default()
        };
        let report = simulate(
            &cfg,
            &opts,
            &signals(&[
                "reset:connect-failure",
                "reset:connect-failure",
                "reset:connect-failure",
                "reset:connect-failure",
            ]),
        )
        .await
        .unwrap();

        assert!(report.enabled);
        let delays: Vec<_> = report.decisions.iter().map(|d| d.delay_ms).collect();
        assert_eq!(delays, vec![Some(24), Some(74), Some(174), None]);
        assert_eq!(report.decisions[3].status, "NoRetryLimitExceeded");
        assert_eq!(report.stats.upstream_rq_retry, 3);
    }

    #[tokio::test]
    async fn simulate_without_triggers_is_disabled() {
        let mut cfg = UpretryConfig::default();
        cfg.retry.retry_on = String::new();
        let opts = SimulateOptions {
            cluster: "default".to_string(),
            ..SimulateOptions::default()
        };
        let report = simulate(&cfg, &opts, &signals(&["status:503"])).await.unwrap();
        assert!(!report.enabled);
        assert!(report.decisions.is_empty());
    }

    #[tokio::test]
    async fn simulate_unknown_cluster_fails() {
        let cfg = UpretryConfig::default();
        let opts = SimulateOptions {
            cluster: "nope".to_string(),
            ..SimulateOptions::default()
        };
        assert!(simulate(&cfg, &opts, &signals(&["status:503"])).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_waits_on_real_timer() {
        let mut cfg = UpretryConfig::default();
        cfg.retry.retry_on = "5xx".to_string();
        let opts = SimulateOptions {
            cluster: "default".to_string(),
            random: vec![20],
            wait: true,
            ..SimulateOptions::default()
        };
        let report = simulate(&cfg, &opts, &signals(&["status:503", "status:200"]))
            .await
            .unwrap();
        assert!(matches!(report.decisions[0].delay_ms, Some(20..=21)));
        assert_eq!(report.decisions[1].status, "No");
        assert_eq!(report.stats.upstream_rq_retry_success, 1);
    }
}
