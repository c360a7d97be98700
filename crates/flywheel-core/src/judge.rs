//! External judge capability.
//!
//! A judge turns matched-indicator evidence into free-text rationale. It is
//! never the source of a pass/fail verdict. Judges are fallible, rate
//! limited and costed, so every call goes through [`explain_with_retry`],
//! which applies bounded exponential backoff and reports the spend back to
//! the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JudgeRetryConfig;
use crate::domain::{JudgeServiceError, Severity};
use crate::metrics::METRICS;
use crate::obs::emit_judge_retry;

/// Evidence for one failed evaluation, sent to a judge for explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub trace_id: String,
    pub scenario_id: String,
    pub scenario_name: String,
    pub severity: Severity,
    pub indicators: Vec<String>,
    pub evidence: Vec<String>,
    pub remediation: String,
}

/// Judge reply: one rationale per request, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResponse {
    pub rationales: Vec<String>,
    #[serde(default)]
    pub cost: f64,
}

/// Adapter contract for a rationale-generating judge.
#[async_trait]
pub trait JudgeService: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn explain(&self, requests: &[JudgeRequest]) -> Result<JudgeResponse, JudgeServiceError>;
}

/// Deterministic local judge; zero cost, never fails.
#[derive(Debug, Clone, Default)]
pub struct TemplateJudge;

impl TemplateJudge {
    pub fn render(request: &JudgeRequest) -> String {
        let mut text = format!(
            "Scenario '{}' ({}) failed on trace '{}': {} indicator(s) matched [{}].",
            request.scenario_name,
            request.severity,
            request.trace_id,
            request.indicators.len(),
            request.indicators.join(", "),
        );
        if let Some(first) = request.evidence.first() {
            text.push_str(&format!(" First evidence: \"{first}\"."));
        }
        if !request.remediation.is_empty() {
            text.push_str(&format!(" Remediation: {}", request.remediation));
        }
        text
    }
}

#[async_trait]
impl JudgeService for TemplateJudge {
    fn name(&self) -> &str {
        "template"
    }

    async fn explain(&self, requests: &[JudgeRequest]) -> Result<JudgeResponse, JudgeServiceError> {
        Ok(JudgeResponse {
            rationales: requests.iter().map(Self::render).collect(),
            cost: 0.0,
        })
    }
}

/// HTTP judge endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpJudgeConfig {
    /// Full URL of the explain endpoint.
    pub endpoint: String,
    /// Bearer token (optional).
    pub token: Option<String>,
    /// Cost charged per request when the service does not report one.
    pub cost_per_request: f64,
    pub timeout_ms: u64,
}

impl Default for HttpJudgeConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("FLYWHEEL_JUDGE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8088/v1/explain".to_string()),
            token: std::env::var("FLYWHEEL_JUDGE_TOKEN").ok(),
            cost_per_request: 0.01,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Serialize)]
struct ExplainBody<'a> {
    requests: &'a [JudgeRequest],
}

#[derive(Deserialize)]
struct ExplainReply {
    rationales: Vec<String>,
    cost: Option<f64>,
}

/// Judge backed by a remote HTTP service.
pub struct HttpJudge {
    config: HttpJudgeConfig,
    http_client: reqwest::Client,
}

impl HttpJudge {
    pub fn new(config: HttpJudgeConfig) -> Result<Self, JudgeServiceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("flywheel-core/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| JudgeServiceError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self, JudgeServiceError> {
        Self::new(HttpJudgeConfig::default())
    }
}

#[async_trait]
impl JudgeService for HttpJudge {
    fn name(&self) -> &str {
        "http"
    }

    async fn explain(&self, requests: &[JudgeRequest]) -> Result<JudgeResponse, JudgeServiceError> {
        let mut req = self
            .http_client
            .post(&self.config.endpoint)
            .json(&ExplainBody { requests });
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| JudgeServiceError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(JudgeServiceError::RateLimited { retry_after_ms });
        }
        if status.is_server_error() {
            return Err(JudgeServiceError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(JudgeServiceError::InvalidResponse(format!("status {status}")));
        }

        let reply: ExplainReply = response
            .json()
            .await
            .map_err(|e| JudgeServiceError::InvalidResponse(e.to_string()))?;

        Ok(JudgeResponse {
            rationales: reply.rationales,
            cost: reply.cost.unwrap_or(self.config.cost_per_request),
        })
    }
}

/// `Retry-After` in delta-seconds, as milliseconds. Absent or unparsable
/// values wait one second.
fn parse_retry_after(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(1_000, |secs| secs.saturating_mul(1_000))
}

/// Outcome of [`explain_with_retry`]: the final result plus everything the
/// judge billed across attempts, including replies that were rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeCall {
    pub result: Result<JudgeResponse, JudgeServiceError>,
    pub cost: f64,
}

/// Call `judge` with bounded exponential backoff.
///
/// Retries only retryable errors. A reply whose rationale count differs from
/// the request count is an `InvalidResponse` and is not retried, but its
/// cost is still reported.
pub async fn explain_with_retry(
    judge: &dyn JudgeService,
    requests: &[JudgeRequest],
    policy: &JudgeRetryConfig,
) -> JudgeCall {
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff_ms = policy.initial_backoff_ms;
    let mut cost = 0.0;

    for attempt in 1..=max_attempts {
        METRICS.inc_judge_calls();
        let err = match judge.explain(requests).await {
            Ok(resp) => {
                cost += resp.cost;
                if resp.rationales.len() == requests.len() {
                    return JudgeCall {
                        result: Ok(resp),
                        cost,
                    };
                }
                JudgeServiceError::InvalidResponse(format!(
                    "expected {} rationales, got {}",
                    requests.len(),
                    resp.rationales.len()
                ))
            }
            Err(e) => e,
        };

        METRICS.inc_judge_failures();
        if !err.is_retryable() || attempt == max_attempts {
            debug!(judge = judge.name(), attempt, error = %err, "judge call abandoned");
            return JudgeCall {
                result: Err(err),
                cost,
            };
        }

        let wait_ms = match &err {
            JudgeServiceError::RateLimited { retry_after_ms } => backoff_ms.max(*retry_after_ms),
            _ => backoff_ms,
        }
        .min(policy.max_backoff_ms);
        emit_judge_retry(judge.name(), attempt, wait_ms, &err);
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        backoff_ms = backoff_ms.saturating_mul(2).min(policy.max_backoff_ms);
    }

    JudgeCall {
        result: Err(JudgeServiceError::Unavailable(
            "retry loop exhausted".to_string(),
        )),
        cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> JudgeRequest {
        JudgeRequest {
            trace_id: "t1".into(),
            scenario_id: "fin-pii-exposure".into(),
            scenario_name: "PII exposure".into(),
            severity: Severity::Critical,
            indicators: vec!["pii:ssn".into()],
            evidence: vec!["SSN: 123-45-6789".into()],
            remediation: "Mask identifiers.".into(),
        }
    }

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
        error: JudgeServiceError,
    }

    #[async_trait]
    impl JudgeService for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn explain(
            &self,
            requests: &[JudgeRequest],
        ) -> Result<JudgeResponse, JudgeServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Err(self.error.clone());
            }
            Ok(JudgeResponse {
                rationales: vec!["ok".into(); requests.len()],
                cost: 0.5,
            })
        }
    }

    fn policy(max_attempts: u32) -> JudgeRetryConfig {
        JudgeRetryConfig {
            max_attempts,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_template_judge_is_deterministic() {
        let judge = TemplateJudge;
        let a = judge.explain(&[request()]).await.unwrap();
        let b = judge.explain(&[request()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cost, 0.0);
        assert!(a.rationales[0].contains("pii:ssn"));
        assert!(a.rationales[0].contains("Mask identifiers."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_then_succeeds() {
        let judge = Flaky {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
            error: JudgeServiceError::Unavailable("503".into()),
        };
        let call = explain_with_retry(&judge, &[request()], &policy(3)).await;
        let resp = call.result.expect("third attempt succeeds");
        assert_eq!(resp.cost, 0.5);
        assert_eq!(call.cost, 0.5);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let judge = Flaky {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
            error: JudgeServiceError::RateLimited { retry_after_ms: 50 },
        };
        let call = explain_with_retry(&judge, &[request()], &policy(2)).await;
        assert_eq!(call.cost, 0.0);
        let err = call.result.expect_err("must give up");
        assert!(matches!(err, JudgeServiceError::RateLimited { .. }));
        assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_response_is_not_retried() {
        let judge = Flaky {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
            error: JudgeServiceError::InvalidResponse("garbage".into()),
        };
        let err = explain_with_retry(&judge, &[request()], &policy(5))
            .await
            .result
            .expect_err("not retryable");
        assert!(matches!(err, JudgeServiceError::InvalidResponse(_)));
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_after_header_saturates() {
        assert_eq!(parse_retry_after(Some("2")), 2_000);
        assert_eq!(parse_retry_after(None), 1_000);
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), 1_000);
        assert_eq!(parse_retry_after(Some(&u64::MAX.to_string())), u64::MAX);
        assert_eq!(parse_retry_after(Some("18446744073709552")), u64::MAX);
    }

    #[tokio::test]
    async fn test_http_judge_unreachable_is_unavailable() {
        let judge = HttpJudge::new(HttpJudgeConfig {
            endpoint: "http://127.0.0.1:9/v1/explain".into(),
            token: None,
            cost_per_request: 0.01,
            timeout_ms: 500,
        })
        .expect("client builds");
        let err = judge.explain(&[request()]).await.expect_err("no server");
        assert!(matches!(err, JudgeServiceError::Unavailable(_)));
    }
}
