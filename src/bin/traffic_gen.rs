//! Chat traffic generator
//!
//! Usage: traffic_gen [requests] [per_minute]
//!
//! Environment variables:
//! - APP_URL: Base URL of the chat service (required)
//! - APP_API_KEY: Sent as X-API-Key when set
//! - TRAFFIC_MIX: Set to 1 for 70% normal / 15% invalid payload / 15% slow prompts
//! - TRAFFIC_CONCURRENCY: Requests in flight at once (default: 1)

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MESSAGES: &[&str] = &[
    "hello observability",
    "give me a checklist for debugging latency",
    "summarize what this app does in one sentence",
    "what are 3 common causes of 500 errors",
];

const SLOW_PROMPT: &str = "simulate slow request: write a detailed, step by step guide to tuning service latency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Normal,
    Invalid,
    Slow,
}

impl RequestKind {
    fn pick<R: Rng>(rng: &mut R, mix: bool) -> Self {
        if !mix {
            return RequestKind::Normal;
        }
        let roll: f64 = rng.gen();
        if roll < 0.70 {
            RequestKind::Normal
        } else if roll < 0.85 {
            RequestKind::Invalid
        } else {
            RequestKind::Slow
        }
    }

    fn payload<R: Rng>(&self, rng: &mut R) -> Value {
        match self {
            RequestKind::Normal => {
                let message = MESSAGES.choose(rng).copied().unwrap_or(MESSAGES[0]);
                json!({ "message": message })
            }
            // Missing message field
            RequestKind::Invalid => json!({}),
            RequestKind::Slow => json!({ "message": SLOW_PROMPT, "slow": true }),
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Ok(Duration),
    Http(u16, Duration),
    Transport,
}

#[derive(Debug, Default)]
struct TrafficStats {
    ok: usize,
    http_errors: usize,
    transport_errors: usize,
    by_status: BTreeMap<u16, usize>,
    latencies: Vec<Duration>,
}

impl TrafficStats {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Ok(latency) => {
                self.ok += 1;
                self.latencies.push(latency);
            }
            Outcome::Http(status, latency) => {
                self.http_errors += 1;
                *self.by_status.entry(status).or_default() += 1;
                self.latencies.push(latency);
            }
            Outcome::Transport => self.transport_errors += 1,
        }
    }

    fn avg_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.latencies.iter().sum();
        sum / self.latencies.len() as u32
    }

    /// Nearest-rank percentile
    fn percentile(&self, pct: usize) -> Duration {
        let mut sorted = self.latencies.clone();
        sorted.sort();
        match sorted.len() {
            0 => Duration::ZERO,
            len => sorted[(len * pct).div_ceil(100).saturating_sub(1).min(len - 1)],
        }
    }
}

async fn send_chat(client: &Client, url: &str, api_key: Option<&str>, payload: &Value) -> Outcome {
    let mut request = client.post(url).json(payload);
    if let Some(key) = api_key {
        request = request.header("X-API-Key", key);
    }

    let start = Instant::now();
    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let latency = start.elapsed();
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            if status.is_success() {
                tracing::info!(
                    status = status.as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "{}",
                    preview
                );
                Outcome::Ok(latency)
            } else {
                tracing::warn!(
                    status = status.as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "{}",
                    preview
                );
                Outcome::Http(status.as_u16(), latency)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Request failed");
            Outcome::Transport
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traffic_gen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let requests: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(60);
    let per_minute: u32 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(30);

    let base_url = std::env::var("APP_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or("Missing APP_URL env var (example: APP_URL=http://localhost:8080)")?;
    let api_key = std::env::var("APP_API_KEY").ok().filter(|v| !v.is_empty());
    let mix = std::env::var("TRAFFIC_MIX").map(|v| v == "1").unwrap_or(false);
    let concurrency: usize = std::env::var("TRAFFIC_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1);

    let url = format!("{}/chat", base_url.trim_end_matches('/'));
    let interval = Duration::from_secs(60) / per_minute;

    println!("Chat Traffic Generator");
    println!("======================");
    println!("Target:       {}", url);
    println!("Requests:     {}", requests);
    println!("Rate:         {} / minute", per_minute);
    println!("Concurrency:  {}", concurrency);
    println!("Mix:          {}", if mix { "70/15/15" } else { "normal only" });
    println!();

    let payloads: Vec<Value> = {
        let mut rng = rand::thread_rng();
        (0..requests)
            .map(|_| RequestKind::pick(&mut rng, mix).payload(&mut rng))
            .collect()
    };

    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    let start = tokio::time::Instant::now();

    let outcomes: Vec<Outcome> = stream::iter(payloads.iter().enumerate())
        .map(|(i, payload)| {
            let client = &client;
            let url = url.as_str();
            let api_key = api_key.as_deref();
            async move {
                tokio::time::sleep_until(start + interval * i as u32).await;
                send_chat(client, url, api_key, payload).await
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut stats = TrafficStats::default();
    for outcome in outcomes {
        stats.add(outcome);
    }

    println!();
    println!("Summary");
    println!("  Ok:                {}", stats.ok);
    println!("  HTTP errors:       {}", stats.http_errors);
    for (status, count) in &stats.by_status {
        println!("    {}:             {}", status, count);
    }
    println!("  Transport errors:  {}", stats.transport_errors);
    println!("  Total time:        {:?}", start.elapsed());
    println!(
        "  Latency:           avg={:?} p50={:?} p99={:?}",
        stats.avg_latency(),
        stats.percentile(50),
        stats.percentile(99)
    );

    Ok(())
}
