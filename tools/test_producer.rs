//! Test Transaction Producer
//!
//! Generates synthetic 30-feature transactions and drives the scoring service
//! with predict requests, following up every tenth prediction with an
//! explain request for the same transaction.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const FEATURE_COUNT: usize = 30;

/// Predict request matching the service's wire format
#[derive(Debug, Clone, Serialize)]
struct PredictRequest {
    transaction_id: String,
    features: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct ExplainRequest {
    transaction_id: String,
}

/// Fields of a predict reply the producer reports on
#[derive(Debug, Deserialize)]
struct PredictReply {
    #[serde(default)]
    prediction: Option<String>,
    #[serde(default)]
    probability: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExplainReply {
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    shap_values: Vec<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Transaction generator for testing
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: u64,
    clock: f64,
}

impl TransactionGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
            clock: 0.0,
        }
    }

    fn next_id(&mut self) -> String {
        self.transaction_counter += 1;
        format!("tx_{:012}", self.transaction_counter)
    }

    /// `[Time, V1..V28, Amount]` with PCA components near zero
    fn generate_legitimate(&mut self) -> PredictRequest {
        self.clock += self.rng.gen_range(1.0..120.0);

        let mut features = Vec::with_capacity(FEATURE_COUNT);
        features.push(self.clock);
        for _ in 0..28 {
            features.push(self.rng.gen_range(-1.5..1.5));
        }
        features.push(self.rng.gen_range(1.0..250.0));

        PredictRequest {
            transaction_id: self.next_id(),
            features,
        }
    }

    /// Strongly negative V10/V12/V14, raised V4/V11 and a large amount
    fn generate_suspicious(&mut self) -> PredictRequest {
        let mut request = self.generate_legitimate();
        let features = &mut request.features;

        features[4] = self.rng.gen_range(2.0..6.0);
        features[10] = self.rng.gen_range(-8.0..-3.0);
        features[11] = self.rng.gen_range(2.0..5.0);
        features[12] = self.rng.gen_range(-10.0..-4.0);
        features[14] = self.rng.gen_range(-12.0..-5.0);
        features[FEATURE_COUNT - 1] = self.rng.gen_range(500.0..5000.0);

        request
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("fraud.predict");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);
    let explain_subject = args.get(6).map(|s| s.as_str()).unwrap_or("fraud.explain");

    info!(
        nats_url = %nats_url,
        subject = %subject,
        explain_subject = %explain_subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate, delay_ms).await;
        }
    };

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    let mut flagged = 0u64;
    let mut failed = 0u64;
    let mut suspicious_count = 0u64;

    for i in 0..count {
        let request = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        let started = Instant::now();
        let payload = serde_json::to_vec(&request)?;
        let message = client.request(subject.to_string(), payload.into()).await?;
        let reply: PredictReply = serde_json::from_slice(&message.payload)?;

        match (&reply.error, &reply.prediction) {
            (Some(error), _) => {
                failed += 1;
                warn!(transaction_id = %request.transaction_id, error = %error, "Prediction failed");
            }
            (None, Some(prediction)) => {
                if prediction == "Fraudulent" {
                    flagged += 1;
                }
                info!(
                    transaction_id = %request.transaction_id,
                    prediction = %prediction,
                    probability = reply.probability.unwrap_or_default(),
                    latency_us = started.elapsed().as_micros() as u64,
                    "Scored"
                );
            }
            (None, None) => warn!("Unrecognised reply"),
        }

        if (i + 1) % 10 == 0 {
            explain(&client, explain_subject, &request.transaction_id).await?;
            info!(
                "Sent {}/{} transactions ({} suspicious, {} flagged, {} failed)",
                i + 1,
                count,
                suspicious_count,
                flagged,
                failed
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Sent {} transactions ({} suspicious, {} flagged, {} failed)",
        count, suspicious_count, flagged, failed
    );

    Ok(())
}

async fn explain(client: &async_nats::Client, subject: &str, transaction_id: &str) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(&ExplainRequest {
        transaction_id: transaction_id.to_string(),
    })?;
    let message = client.request(subject.to_string(), payload.into()).await?;
    let reply: ExplainReply = serde_json::from_slice(&message.payload)?;

    if let Some(error) = reply.error {
        warn!(transaction_id = %transaction_id, error = %error, "Explanation failed");
        return Ok(());
    }

    let top: Vec<String> = reply
        .feature_names
        .iter()
        .zip(&reply.shap_values)
        .take(5)
        .map(|(name, value)| format!("{}={:+.4}", name, value))
        .collect();
    info!(transaction_id = %transaction_id, top = ?top, "Top attributions");
    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let request = if rng.gen_bool(fraud_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        let json = serde_json::to_string_pretty(&request)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample transaction {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
