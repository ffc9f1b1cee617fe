//! Load generator for the serving engine.
//!
//! Drives POST /v1/generate with a mixed workload: warm requests share a
//! fixed system prefix so repeated runs exercise the prefix cache, cold
//! requests carry random token sequences that rarely repeat. One record per
//! request lands in a flat CSV for downstream analysis, and a summary is
//! logged per workload kind.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use radix_serve::server::api::{GenerateRequest, GenerateResponse};
use radix_serve::TokenId;

/// Shared prefix for warm requests, standing in for a system prompt.
const SYSTEM_PREFIX: [TokenId; 3] = [101, 102, 103];

#[derive(Parser, Debug)]
#[command(name = "benchmark", about = "Load generator for radix-serve")]
struct Args {
    /// Base URL of the server.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Total number of requests to send.
    #[arg(long, default_value_t = 100)]
    requests: usize,

    /// Maximum in-flight requests.
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    /// Fraction of requests sharing the warm prefix.
    #[arg(long, default_value_t = 0.5)]
    warm_ratio: f64,

    /// Output CSV path.
    #[arg(long, default_value = "benchmark_data.csv")]
    output: PathBuf,

    /// RNG seed for a reproducible workload.
    #[arg(long)]
    seed: Option<u64>,
}

struct WorkloadItem {
    id: usize,
    kind: &'static str,
    prompt: Vec<TokenId>,
}

struct BenchRecord {
    id: usize,
    kind: &'static str,
    latency_ms: f64,
    hit_rate: f64,
    status: u16,
}

fn build_workload(args: &Args) -> Vec<WorkloadItem> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    (0..args.requests)
        .map(|id| {
            if rng.gen::<f64>() < args.warm_ratio {
                let mut prompt = SYSTEM_PREFIX.to_vec();
                prompt.push(rng.gen_range(200..=999));
                WorkloadItem {
                    id,
                    kind: "warm",
                    prompt,
                }
            } else {
                let prompt = (0..4).map(|_| rng.gen_range(1000..=2000)).collect();
                WorkloadItem {
                    id,
                    kind: "cold",
                    prompt,
                }
            }
        })
        .collect()
}

async fn send_request(client: reqwest::Client, base: String, item: WorkloadItem) -> BenchRecord {
    let started = Instant::now();

    match client
        .post(format!("{base}/v1/generate"))
        .json(&GenerateRequest {
            prompt_ids: item.prompt,
        })
        .send()
        .await
    {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            let hit_rate = match resp.json::<GenerateResponse>().await {
                Ok(body) => body.metrics.cache_hit_rate,
                Err(_) => 0.0,
            };
            BenchRecord {
                id: item.id,
                kind: item.kind,
                latency_ms,
                hit_rate,
                status,
            }
        }
        Err(e) => {
            warn!(id = item.id, error = %e, "Request failed");
            BenchRecord {
                id: item.id,
                kind: item.kind,
                latency_ms: 0.0,
                hit_rate: 0.0,
                status: 500,
            }
        }
    }
}

fn write_csv(path: &Path, records: &[BenchRecord]) -> anyhow::Result<()> {
    let mut out = File::create(path)?;
    writeln!(out, "id,type,latency_ms,hit_rate,status")?;
    for r in records {
        writeln!(
            out,
            "{},{},{:.3},{:.4},{}",
            r.id, r.kind, r.latency_ms, r.hit_rate, r.status
        )?;
    }
    Ok(())
}

fn summarize(kind: &str, records: &[BenchRecord]) {
    let subset: Vec<&BenchRecord> = records.iter().filter(|r| r.kind == kind).collect();
    if subset.is_empty() {
        return;
    }
    let n = subset.len() as f64;
    let mean_latency: f64 = subset.iter().map(|r| r.latency_ms).sum::<f64>() / n;
    let mean_hit: f64 = subset.iter().map(|r| r.hit_rate).sum::<f64>() / n;

    info!(
        kind = kind,
        requests = subset.len(),
        mean_latency_ms = mean_latency,
        mean_hit_rate = mean_hit,
        "Workload summary"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    info!(
        url = %args.url,
        requests = args.requests,
        concurrency = args.concurrency,
        "Benchmark started"
    );

    let workload = build_workload(&args);
    let client = reqwest::Client::new();
    let base = args.url.clone();

    let mut records: Vec<BenchRecord> = stream::iter(workload)
        .map(|item| {
            let client = client.clone();
            let base = base.clone();
            async move { send_request(client, base, item).await }
        })
        .buffer_unordered(args.concurrency)
        .collect()
        .await;

    records.sort_by_key(|r| r.id);
    write_csv(&args.output, &records)?;

    summarize("warm", &records);
    summarize("cold", &records);

    let failures = records.iter().filter(|r| r.status != 200).count();
    info!(
        total = records.len(),
        failures = failures,
        output = %args.output.display(),
        "Benchmark complete"
    );

    Ok(())
}
