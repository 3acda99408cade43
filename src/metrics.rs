//! Performance metrics and statistics tracking for the scoring service.

use crate::models::ScoreAggregator;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the scoring service
pub struct PipelineMetrics {
    /// Successful predictions
    pub transactions_processed: AtomicU64,
    /// Predictions with a Fraudulent verdict
    pub fraud_detected: AtomicU64,
    /// Successful explanations
    pub explanations_served: AtomicU64,
    /// Predictions served by a degraded ensemble
    pub degraded_predictions: AtomicU64,
    /// Requests answered with an error reply
    pub requests_rejected: AtomicU64,
    /// Neural extractor failures, kept apart from ensemble members
    pub extractor_failures: AtomicU64,
    rejections_by_kind: RwLock<HashMap<String, u64>>,
    member_failures: RwLock<HashMap<String, u64>>,
    alerts_by_level: RwLock<HashMap<String, u64>>,
    /// Predict latencies (in microseconds)
    predict_times: RwLock<Vec<u64>>,
    /// Explain latencies (in microseconds)
    explain_times: RwLock<Vec<u64>>,
    /// Probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
    /// Member agreement per prediction
    model_agreements: RwLock<Vec<f64>>,
}

/// Prediction counters as reported on the info subject
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionStats {
    pub total_predictions: u64,
    pub fraud_detected: u64,
    /// Percentage of predictions judged fraudulent
    pub fraud_ratio: f64,
    pub explanations_served: u64,
    pub degraded_predictions: u64,
    pub requests_rejected: u64,
    pub extractor_failures: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_processed: AtomicU64::new(0),
            fraud_detected: AtomicU64::new(0),
            explanations_served: AtomicU64::new(0),
            degraded_predictions: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            extractor_failures: AtomicU64::new(0),
            rejections_by_kind: RwLock::new(HashMap::new()),
            member_failures: RwLock::new(HashMap::new()),
            alerts_by_level: RwLock::new(HashMap::new()),
            predict_times: RwLock::new(Vec::with_capacity(1000)),
            explain_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
            model_agreements: RwLock::new(Vec::with_capacity(1000)),
        }
    }

    /// Record a successful prediction
    pub fn record_prediction(&self, elapsed: Duration, probability: f64, fraud: bool) {
        self.transactions_processed.fetch_add(1, Ordering::Relaxed);
        if fraud {
            self.fraud_detected.fetch_add(1, Ordering::Relaxed);
        }
        push_bounded(&self.predict_times, elapsed.as_micros() as u64, 10000);

        let bucket = ((probability * 10.0).max(0.0) as usize).min(9);
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_explanation(&self, elapsed: Duration) {
        self.explanations_served.fetch_add(1, Ordering::Relaxed);
        push_bounded(&self.explain_times, elapsed.as_micros() as u64, 10000);
    }

    /// Record an error reply by kind
    pub fn record_rejection(&self, kind: &str) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.rejections_by_kind.write() {
            *by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    /// Record a prediction that dropped members
    pub fn record_degraded(&self, excluded: &[String]) {
        self.degraded_predictions.fetch_add(1, Ordering::Relaxed);
        for member in excluded {
            self.record_member_failure(member);
        }
    }

    pub fn record_member_failure(&self, member: &str) {
        if let Ok(mut failures) = self.member_failures.write() {
            *failures.entry(member.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_extractor_failure(&self) {
        self.extractor_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self, risk_level: &str) {
        if let Ok(mut by_level) = self.alerts_by_level.write() {
            *by_level.entry(risk_level.to_string()).or_insert(0) += 1;
        }
    }

    /// Record member agreement (1 - std dev of member probabilities)
    pub fn record_model_agreement(&self, member_scores: &[(String, f64)]) {
        let scores: Vec<f64> = member_scores.iter().map(|(_, s)| *s).collect();
        if let Some(agreement) = ScoreAggregator::agreement(&scores) {
            push_bounded(&self.model_agreements, agreement, 1000);
        }
    }

    pub fn stats(&self) -> PredictionStats {
        let total = self.transactions_processed.load(Ordering::Relaxed);
        let fraud = self.fraud_detected.load(Ordering::Relaxed);
        PredictionStats {
            total_predictions: total,
            fraud_detected: fraud,
            fraud_ratio: if total > 0 {
                fraud as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            explanations_served: self.explanations_served.load(Ordering::Relaxed),
            degraded_predictions: self.degraded_predictions.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            extractor_failures: self.extractor_failures.load(Ordering::Relaxed),
        }
    }

    pub fn get_predict_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(&read(&self.predict_times))
    }

    pub fn get_explain_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(&read(&self.explain_times))
    }

    pub fn get_avg_agreement(&self) -> f64 {
        let agreements = read(&self.model_agreements);
        if agreements.is_empty() {
            return 0.0;
        }
        agreements.iter().sum::<f64>() / agreements.len() as f64
    }

    /// Predictions per second since start
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self.score_buckets.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_member_failures(&self) -> HashMap<String, u64> {
        read(&self.member_failures)
    }

    pub fn get_rejections_by_kind(&self) -> HashMap<String, u64> {
        read(&self.rejections_by_kind)
    }

    pub fn get_alerts_by_level(&self) -> HashMap<String, u64> {
        read(&self.alerts_by_level)
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let stats = self.stats();
        let predict = self.get_predict_stats();
        let explain = self.get_explain_stats();
        let throughput = self.get_throughput();
        let agreement = self.get_avg_agreement();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            FRAUD SCORING SERVICE - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions: {:>8}  │  Throughput: {:>6.1} tx/s            ║",
            stats.total_predictions, throughput
        );
        info!(
            "║ Fraud Detected: {:>8}  │  Fraud Ratio: {:>6.2}%           ║",
            stats.fraud_detected, stats.fraud_ratio
        );
        info!(
            "║ Explanations: {:>8}  │  Rejected: {:>8}  │  Degraded: {:>6} ║",
            stats.explanations_served, stats.requests_rejected, stats.degraded_predictions
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predict (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}       ║",
            predict.mean_us, predict.p50_us, predict.p95_us, predict.p99_us
        );
        info!(
            "║ Explain (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}       ║",
            explain.mean_us, explain.p50_us, explain.p95_us, explain.p99_us
        );
        info!(
            "║ Member Agreement: {:>5.1}% (higher = members agree more)      ║",
            agreement * 100.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Probability Distribution:                                    ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        if stats.extractor_failures > 0 {
            info!("Extractor Failures: {}", stats.extractor_failures);
        }
        let failures = self.get_member_failures();
        if !failures.is_empty() {
            info!("Member Failures:");
            for (member, count) in &failures {
                info!("  {}: {}", member, count);
            }
        }
        let rejections = self.get_rejections_by_kind();
        if !rejections.is_empty() {
            info!("Rejections by Kind:");
            for (kind, count) in &rejections {
                info!("  {}: {}", kind, count);
            }
        }
        let alerts = self.get_alerts_by_level();
        if !alerts.is_empty() {
            info!("Alerts by Risk Level:");
            for (level, count) in &alerts {
                info!("  {}: {}", level, count);
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(samples: &RwLock<Vec<T>>, value: T, limit: usize) {
    if let Ok(mut samples) = samples.write() {
        samples.push(value);
        if samples.len() > limit {
            samples.drain(0..limit / 2);
        }
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Latency statistics
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencyStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        Self {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: sorted[count / 2],
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
