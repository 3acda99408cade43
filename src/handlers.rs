//! Request handlers for the predict, explain and info subjects.
//!
//! Each handler takes a raw request payload and returns the reply bytes. They
//! are synchronous and CPU-bound; the server runs them on the blocking pool.

use crate::config::DetectionConfig;
use crate::consumer::Operation;
use crate::error::ScoringError;
use crate::features;
use crate::metrics::{PipelineMetrics, PredictionStats};
use crate::service::{ModelInfo, PredictionService};
use crate::store::InMemoryTransactionStore;
use crate::types::{
    generate_transaction_id, ErrorResponse, ExplainRequest, ExplainResponse, FraudAlert,
    PredictRequest, PredictResponse, TransactionRecord, TransactionStatus,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Recent transactions included in an info reply
const RECENT_TRANSACTIONS: usize = 10;

/// Shared state for every handler
#[derive(Clone)]
pub struct HandlerContext {
    pub service: Arc<PredictionService>,
    pub store: Arc<InMemoryTransactionStore>,
    pub metrics: Arc<PipelineMetrics>,
    pub detection: DetectionConfig,
}

/// Reply bytes plus an alert to publish, if any
#[derive(Debug)]
pub struct Reply {
    pub payload: Vec<u8>,
    pub alert: Option<FraudAlert>,
}

impl Reply {
    pub fn plain(payload: Vec<u8>) -> Self {
        Self {
            payload,
            alert: None,
        }
    }
}

/// Reply on the info subject
#[derive(Debug, Clone, Serialize)]
pub struct InfoResponse {
    pub status: &'static str,
    pub model: ModelInfo,
    pub stats: PredictionStats,
    pub recent_transactions: Vec<TransactionRecord>,
}

impl HandlerContext {
    /// Run the handler for `operation`. The returned alert belongs to the
    /// stored record and must be published even if the reply is late.
    pub fn handle(&self, operation: Operation, payload: &[u8]) -> Reply {
        match operation {
            Operation::Predict => self.handle_predict(payload),
            Operation::Explain => Reply::plain(self.handle_explain(payload)),
            Operation::Info => Reply::plain(self.handle_info()),
        }
    }

    /// Score one transaction, store it for later explanation and build the
    /// reply. Fraudulent verdicts carry an alert.
    pub fn handle_predict(&self, payload: &[u8]) -> Reply {
        let started = Instant::now();

        let request: PredictRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => return Reply::plain(self.reject_malformed("predict", &e)),
        };
        let features = match features::validate_values(&request.features) {
            Ok(features) => features,
            Err(e) => return Reply::plain(self.reject("predict", &e)),
        };
        let score = match self.service.score(&features) {
            Ok(score) => score,
            Err(e) => return Reply::plain(self.reject("predict", &e)),
        };

        let transaction_id = request
            .transaction_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_transaction_id);
        let status = TransactionStatus::from_probability(
            score.probability,
            score.threshold_used,
            self.detection.review_threshold,
        );

        self.store.insert(TransactionRecord {
            transaction_id: transaction_id.clone(),
            amount: features.amount(),
            timestamp: Utc::now(),
            risk_score: score.probability_percent(),
            status,
            prediction: score.verdict,
            features,
        });

        self.metrics
            .record_prediction(started.elapsed(), score.probability, score.verdict.is_fraud());
        self.metrics.record_model_agreement(&score.member_scores);
        if score.is_degraded() {
            self.metrics.record_degraded(&score.excluded_members);
        }

        let alert = score.verdict.is_fraud().then(|| {
            let alert = FraudAlert::from_score(
                transaction_id.clone(),
                &score,
                &self.detection.risk_levels,
            )
            .with_amount(features.amount());
            self.metrics
                .record_alert(&format!("{:?}", alert.risk_level).to_lowercase());
            info!(
                transaction_id = %transaction_id,
                risk_score = alert.risk_score,
                risk_level = ?alert.risk_level,
                "FRAUD ALERT generated"
            );
            alert
        });

        debug!(
            transaction_id = %transaction_id,
            probability = score.probability,
            verdict = %score.verdict,
            latency_us = started.elapsed().as_micros() as u64,
            "Prediction served"
        );

        Reply {
            payload: encode(&PredictResponse {
                transaction_id,
                prediction: score.verdict,
                probability: score.probability_percent(),
                threshold_used: score.threshold_used,
                hybrid_feature_count: score.hybrid_feature_count,
                status,
            }),
            alert,
        }
    }

    /// Explain a previously scored transaction. A failure here never touches
    /// the stored prediction.
    pub fn handle_explain(&self, payload: &[u8]) -> Vec<u8> {
        let started = Instant::now();

        let request: ExplainRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => return self.reject_malformed("explain", &e),
        };

        match self.service.explain(&request.transaction_id) {
            Ok(result) => {
                self.metrics.record_explanation(started.elapsed());
                debug!(
                    transaction_id = %request.transaction_id,
                    features = result.attributions.entries.len(),
                    "Explanation served"
                );
                encode(&ExplainResponse::from(&result))
            }
            Err(e) => self.reject("explain", &e),
        }
    }

    pub fn handle_info(&self) -> Vec<u8> {
        encode(&InfoResponse {
            status: "healthy",
            model: self.service.model_info(),
            stats: self.metrics.stats(),
            recent_transactions: self.store.recent(RECENT_TRANSACTIONS),
        })
    }

    /// Error reply for a request that ran out of time
    pub fn timeout_reply(&self, operation: &str, timeout_ms: u64) -> Vec<u8> {
        warn!(operation = operation, timeout_ms = timeout_ms, "Request timed out");
        self.metrics.record_rejection("timeout");
        encode(&ErrorResponse::timeout(timeout_ms))
    }

    /// Error reply for a handler that crashed
    pub fn internal_error_reply(&self, operation: &str) -> Vec<u8> {
        error!(operation = operation, "Request handler failed");
        self.metrics.record_rejection("internal_error");
        encode(&ErrorResponse::internal())
    }

    fn reject(&self, operation: &str, err: &ScoringError) -> Vec<u8> {
        if err.is_client_error() {
            warn!(operation = operation, kind = err.kind(), error = %err, "Request rejected");
        } else {
            error!(operation = operation, kind = err.kind(), error = %err, "Request failed");
        }
        match err {
            ScoringError::Inference { member, .. } => self.metrics.record_member_failure(member),
            ScoringError::Extraction(_) => self.metrics.record_extractor_failure(),
            _ => {}
        }
        self.metrics.record_rejection(err.kind());
        encode(&ErrorResponse::from(err))
    }

    fn reject_malformed(&self, operation: &str, err: &serde_json::Error) -> Vec<u8> {
        warn!(operation = operation, error = %err, "Malformed request");
        self.metrics.record_rejection("bad_request");
        encode(&ErrorResponse::bad_request(format!("malformed request: {}", err)))
    }
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize reply");
        serde_json::to_vec(&ErrorResponse::internal()).unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Verdict;
    use crate::service::tests::{models, models_with, overflowing_extractor};
    use serde_json::{json, Value};

    fn context(probability: f64) -> HandlerContext {
        context_with(models(probability, 32).unwrap())
    }

    fn context_with(models: crate::service::ScoringModels) -> HandlerContext {
        let store = Arc::new(InMemoryTransactionStore::new(10));
        let service = PredictionService::new(models, store.clone());
        HandlerContext {
            service: Arc::new(service),
            store,
            metrics: Arc::new(PipelineMetrics::new()),
            detection: DetectionConfig::default(),
        }
    }

    fn predict_body(id: Option<&str>, len: usize) -> Vec<u8> {
        json!({"transaction_id": id, "features": vec![0.0; len]})
            .to_string()
            .into_bytes()
    }

    #[test]
    fn test_predict_stores_and_alerts() {
        let ctx = context(0.8);

        let reply = ctx.handle_predict(&predict_body(Some("tx-1"), 30));
        let response: PredictResponse = serde_json::from_slice(&reply.payload).unwrap();

        assert_eq!(response.transaction_id, "tx-1");
        assert_eq!(response.prediction, Verdict::Fraudulent);
        assert!((response.probability - 80.0).abs() < 1e-9);
        assert_eq!(response.status, TransactionStatus::Flagged);
        assert!(reply.alert.is_some());

        let record = ctx.store.get("tx-1").unwrap();
        assert!((record.risk_score - 80.0).abs() < 1e-9);
        assert_eq!(ctx.metrics.stats().fraud_detected, 1);
    }

    #[test]
    fn test_predict_generates_id() {
        let ctx = context(0.1);

        let reply = ctx.handle_predict(&predict_body(None, 30));
        let response: PredictResponse = serde_json::from_slice(&reply.payload).unwrap();

        assert!(response.transaction_id.starts_with("TXN_"));
        assert_eq!(response.status, TransactionStatus::Clear);
        assert!(reply.alert.is_none());
        assert!(ctx.store.get(&response.transaction_id).is_some());
    }

    #[test]
    fn test_predict_shape_error_reply() {
        let ctx = context(0.1);

        let reply = ctx.handle_predict(&predict_body(Some("short"), 29));
        let error: ErrorResponse = serde_json::from_slice(&reply.payload).unwrap();

        assert_eq!(error.error, "shape_error");
        assert_eq!(error.status_code, 400);
        assert!(ctx.store.is_empty());
        assert_eq!(ctx.metrics.stats().requests_rejected, 1);
    }

    #[test]
    fn test_malformed_payload() {
        let ctx = context(0.1);
        let reply = ctx.handle_predict(b"not json");
        let error: ErrorResponse = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(error.status_code, 400);
    }

    #[test]
    fn test_explain_after_predict() {
        let ctx = context(0.3);
        ctx.handle_predict(&predict_body(Some("tx-9"), 30));

        let reply = ctx.handle_explain(br#"{"transaction_id": "tx-9"}"#);
        let response: ExplainResponse = serde_json::from_slice(&reply).unwrap();

        assert_eq!(response.transaction_id.as_deref(), Some("tx-9"));
        assert_eq!(response.feature_names.len(), 32);
        assert_eq!(response.shap_values.len(), response.feature_values.len());
        assert_eq!(response.prediction_probability, 0.3);
    }

    #[test]
    fn test_explain_unknown_id() {
        let ctx = context(0.3);

        let reply = ctx.handle_explain(br#"{"transaction_id": "unknown-id"}"#);
        let error: ErrorResponse = serde_json::from_slice(&reply).unwrap();

        assert_eq!(error.error, "not_found");
        assert_eq!(error.status_code, 404);
    }

    #[test]
    fn test_info_reply() {
        let ctx = context(0.8);
        ctx.handle_predict(&predict_body(Some("tx-1"), 30));

        let info: Value = serde_json::from_slice(&ctx.handle_info()).unwrap();
        assert_eq!(info["status"], "healthy");
        assert_eq!(info["model"]["hybrid_features"], 32);
        assert_eq!(info["stats"]["total_predictions"], 1);
        assert_eq!(info["stats"]["fraud_ratio"], 100.0);
        assert_eq!(info["recent_transactions"][0]["transaction_id"], "tx-1");
    }

    #[test]
    fn test_timeout_reply() {
        let ctx = context(0.1);
        let error: ErrorResponse = serde_json::from_slice(&ctx.timeout_reply("predict", 100)).unwrap();
        assert_eq!(error.status_code, 504);
    }

    #[test]
    fn test_every_flagged_record_has_an_alert() {
        for probability in [0.5, 0.51, 0.7, 0.95, 1.0] {
            let ctx = context(probability);
            let reply = ctx.handle(Operation::Predict, &predict_body(Some("tx-f"), 30));

            let alert = reply.alert.expect("fraudulent verdict without alert");
            assert_eq!(alert.transaction_id, "tx-f");
            assert!((alert.risk_score - probability).abs() < 1e-12);
            assert_eq!(ctx.store.get("tx-f").unwrap().status, TransactionStatus::Flagged);
        }

        for probability in [0.0, 0.3, 0.49] {
            let ctx = context(probability);
            let reply = ctx.handle(Operation::Predict, &predict_body(Some("tx-c"), 30));
            assert!(reply.alert.is_none());
            assert_ne!(ctx.store.get("tx-c").unwrap().status, TransactionStatus::Flagged);
        }
    }

    #[test]
    fn test_only_predict_raises_alerts() {
        let ctx = context(0.9);
        ctx.handle(Operation::Predict, &predict_body(Some("tx-1"), 30));

        let explain = ctx.handle(Operation::Explain, br#"{"transaction_id": "tx-1"}"#);
        let info = ctx.handle(Operation::Info, b"");
        assert!(explain.alert.is_none());
        assert!(info.alert.is_none());

        let response: ExplainResponse = serde_json::from_slice(&explain.payload).unwrap();
        assert!(response.excluded_members.is_empty());
    }

    #[test]
    fn test_extractor_failure_counted_separately() {
        let ctx = context_with(models_with(overflowing_extractor(), 0.4, 32).unwrap());

        let body = json!({"transaction_id": "tx-x", "features": vec![1e9; 30]})
            .to_string()
            .into_bytes();
        let reply = ctx.handle_predict(&body);
        let error: ErrorResponse = serde_json::from_slice(&reply.payload).unwrap();

        assert_eq!(error.error, "extraction_error");
        assert_eq!(error.status_code, 500);
        assert!(ctx.metrics.get_member_failures().is_empty());
        assert_eq!(ctx.metrics.stats().extractor_failures, 1);
        assert_eq!(
            ctx.metrics.get_rejections_by_kind().get("extraction_error"),
            Some(&1)
        );
    }
}
