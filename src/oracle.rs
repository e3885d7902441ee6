//! The Agent Oracle (C1): a bounded-capacity text oracle in front of the
//! external LLM, plus the sliding-window rate tracker that guards it.
//!
//! The rate tracker's shape — an `Arc<RwLock<HashMap<_, _>>>` of
//! window-keyed counters reset on read — is the same one the teacher's
//! `RateLimiter` (`security.rs`) uses for HTTP endpoint throttling,
//! generalized here from a single counter to a paired request/token budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

use crate::error::OracleError;

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
    pub conversation_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleStatus {
    pub requests_this_minute: u32,
    pub tokens_this_minute: u32,
    pub consecutive_rate_limits: u32,
    pub minutes_until_reset: f64,
}

/// The minimal contract the Agent Driver depends on. Both the HTTP-backed
/// implementation and the in-test mock implement this so C4 never needs to
/// know which one it's holding.
#[async_trait]
pub trait AgentOracle: Send + Sync {
    async fn ask(
        &self,
        player_id: &str,
        prompt: &str,
        options: &AskOptions,
    ) -> Result<String, OracleError>;

    async fn status(&self) -> OracleStatus;

    async fn should_degrade(&self) -> bool;
}

const DEGRADE_CONSECUTIVE_RATE_LIMITS: u32 = 3;
const DEGRADE_BUDGET_FRACTION: f64 = 0.90;

struct WindowCounters {
    window_start: SystemTime,
    requests: u32,
    tokens: u32,
}

impl WindowCounters {
    fn fresh(now: SystemTime) -> Self {
        Self {
            window_start: now,
            requests: 0,
            tokens: 0,
        }
    }
}

/// Tracks per-minute request/token budgets and consecutive-rate-limit
/// streaks. Shared across every call the oracle makes, regardless of which
/// player issued it — budgets are process-wide, not per-player.
pub struct RateTracker {
    counters: Arc<RwLock<WindowCounters>>,
    consecutive_rate_limits: Arc<RwLock<u32>>,
    rpm: u32,
    tpm: u32,
}

impl RateTracker {
    pub fn new(rpm: u32, tpm: u32) -> Self {
        Self {
            counters: Arc::new(RwLock::new(WindowCounters::fresh(SystemTime::now()))),
            consecutive_rate_limits: Arc::new(RwLock::new(0)),
            rpm,
            tpm,
        }
    }

    async fn roll_window_if_stale(&self, counters: &mut WindowCounters, now: SystemTime) {
        if now
            .duration_since(counters.window_start)
            .unwrap_or(Duration::ZERO)
            >= Duration::from_secs(60)
        {
            *counters = WindowCounters::fresh(now);
        }
    }

    /// Reserves budget for one call of `estimated_tokens`. Returns `false`
    /// (without mutating the counters) when admitting the call would exceed
    /// either per-minute budget.
    pub async fn try_admit(&self, estimated_tokens: u32) -> bool {
        let now = SystemTime::now();
        let mut counters = self.counters.write().await;
        self.roll_window_if_stale(&mut counters, now).await;

        if counters.requests + 1 > self.rpm || counters.tokens + estimated_tokens > self.tpm {
            return false;
        }
        counters.requests += 1;
        counters.tokens += estimated_tokens;
        true
    }

    pub async fn record_rate_limited(&self) {
        let mut streak = self.consecutive_rate_limits.write().await;
        *streak += 1;
    }

    pub async fn record_success(&self) {
        let mut streak = self.consecutive_rate_limits.write().await;
        *streak = 0;
    }

    pub async fn status(&self) -> OracleStatus {
        let now = SystemTime::now();
        let counters = self.counters.read().await;
        let elapsed = now
            .duration_since(counters.window_start)
            .unwrap_or(Duration::ZERO);
        let remaining = Duration::from_secs(60).saturating_sub(elapsed);
        OracleStatus {
            requests_this_minute: counters.requests,
            tokens_this_minute: counters.tokens,
            consecutive_rate_limits: *self.consecutive_rate_limits.read().await,
            minutes_until_reset: remaining.as_secs_f64() / 60.0,
        }
    }

    pub async fn should_degrade(&self) -> bool {
        let status = self.status().await;
        let request_fraction = status.requests_this_minute as f64 / self.rpm.max(1) as f64;
        let token_fraction = status.tokens_this_minute as f64 / self.tpm.max(1) as f64;
        request_fraction >= DEGRADE_BUDGET_FRACTION
            || token_fraction >= DEGRADE_BUDGET_FRACTION
            || status.consecutive_rate_limits >= DEGRADE_CONSECUTIVE_RATE_LIMITS
    }

    /// Exponential backoff with jitter, doubling per consecutive rate limit.
    pub async fn backoff_delay(&self) -> Duration {
        let streak = *self.consecutive_rate_limits.read().await;
        let base_ms = 500u64.saturating_mul(1u64 << streak.min(6));
        let jitter_ms = rand::thread_rng().gen_range(0..250);
        Duration::from_millis(base_ms + jitter_ms)
    }
}

/// Reqwest-backed oracle, grounded in the teacher's `BlockchainClient`: a
/// thin `reqwest::Client` wrapper that POSTs a JSON body and deserializes a
/// typed JSON response, with the rate tracker gating admission up front.
pub struct HttpAgentOracle {
    http: reqwest::Client,
    base_url: String,
    rate: RateTracker,
    deadline: Duration,
}

#[derive(Debug, serde::Serialize)]
struct AskRequest<'a> {
    prompt: &'a str,
    system: Option<&'a str>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    conversation_key: Option<&'a str>,
}

#[derive(Debug, serde::Deserialize)]
struct AskResponse {
    text: String,
}

impl HttpAgentOracle {
    pub fn new(base_url: impl Into<String>, rpm: u32, tpm: u32, deadline: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            rate: RateTracker::new(rpm, tpm),
            deadline,
        }
    }

    fn estimate_tokens(prompt: &str, options: &AskOptions) -> u32 {
        let text_len = prompt.len() as u32 + options.system.as_ref().map_or(0, |s| s.len() as u32);
        (text_len / 4).max(1) + options.max_tokens.unwrap_or(256)
    }
}

#[async_trait]
impl AgentOracle for HttpAgentOracle {
    async fn ask(
        &self,
        player_id: &str,
        prompt: &str,
        options: &AskOptions,
    ) -> Result<String, OracleError> {
        if !self.rate.try_admit(Self::estimate_tokens(prompt, options)).await {
            self.rate.record_rate_limited().await;
            return Err(OracleError::RateLimited);
        }

        let body = AskRequest {
            prompt,
            system: options.system.as_deref(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            conversation_key: options
                .conversation_key
                .as_deref()
                .or(Some(player_id)),
        };

        let response = tokio::time::timeout(
            self.deadline,
            self.http.post(&self.base_url).json(&body).send(),
        )
        .await
        .map_err(|_| OracleError::Timeout)?
        .map_err(|e| OracleError::UpstreamError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.rate.record_rate_limited().await;
            return Err(OracleError::RateLimited);
        }

        let response = response
            .error_for_status()
            .map_err(|e| OracleError::UpstreamError(e.to_string()))?;

        let parsed: AskResponse = response
            .json()
            .await
            .map_err(|e| OracleError::ParseErrorUpstream(e.to_string()))?;

        self.rate.record_success().await;
        Ok(parsed.text)
    }

    async fn status(&self) -> OracleStatus {
        self.rate.status().await
    }

    async fn should_degrade(&self) -> bool {
        self.rate.should_degrade().await
    }
}

/// Deterministic, no-network oracle for tests and local scenarios. Keyed
/// canned responses mirror the teacher's test-double email service: the
/// caller programs in expected prompts and gets exactly what it asked for.
pub struct MockAgentOracle {
    responses: RwLock<HashMap<String, String>>,
    errors: RwLock<HashMap<String, OracleError>>,
    default_response: String,
    degrade: RwLock<bool>,
}

impl MockAgentOracle {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            responses: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
            default_response: default_response.into(),
            degrade: RwLock::new(false),
        }
    }

    pub async fn program(&self, player_id: impl Into<String>, response: impl Into<String>) {
        self.responses
            .write()
            .await
            .insert(player_id.into(), response.into());
    }

    /// Forces `ask` to fail for `player_id`, simulating a disconnected or
    /// unreachable agent (Scenario E).
    pub async fn program_error(&self, player_id: impl Into<String>, error: OracleError) {
        self.errors.write().await.insert(player_id.into(), error);
    }

    pub async fn set_degrade(&self, degrade: bool) {
        *self.degrade.write().await = degrade;
    }
}

#[async_trait]
impl AgentOracle for MockAgentOracle {
    async fn ask(
        &self,
        player_id: &str,
        _prompt: &str,
        _options: &AskOptions,
    ) -> Result<String, OracleError> {
        if let Some(err) = self.errors.read().await.get(player_id) {
            return Err(err.clone());
        }
        let responses = self.responses.read().await;
        Ok(responses
            .get(player_id)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone()))
    }

    async fn status(&self) -> OracleStatus {
        OracleStatus {
            requests_this_minute: 0,
            tokens_this_minute: 0,
            consecutive_rate_limits: 0,
            minutes_until_reset: 1.0,
        }
    }

    async fn should_degrade(&self) -> bool {
        *self.degrade.read().await
    }
}
