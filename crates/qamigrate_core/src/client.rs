use std::env;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::config::{DEFAULT_API_URL, DEFAULT_USER_AGENT, MigrateConfig};
use crate::credentials::{CredentialManager, GithubAppIssuer};
use crate::error::MigrateError;
use crate::rate_limit::{Clock, RateLimiter, SystemClock};

/// Label mutations are still behind a preview media type.
const GRAPHQL_ACCEPT: &str = "application/vnd.github.bane-preview+json";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub min_interval: Duration,
}

impl ClientConfig {
    pub fn from_config(config: &MigrateConfig) -> Self {
        let api_default = config.github.api_url.as_deref().unwrap_or(DEFAULT_API_URL);
        let user_agent_default = config
            .github
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT);
        Self {
            api_url: env_value("GHD_API_URL", api_default),
            user_agent: env_value("GHD_USER_AGENT", user_agent_default),
            timeout_ms: env_value_u64("GHD_HTTP_TIMEOUT_MS", 30_000),
            min_interval: Duration::try_from_secs_f64(config.migration.api_interval_secs())
                .unwrap_or_default(),
        }
    }

    pub fn graphql_endpoint(&self) -> String {
        format!("{}/graphql", self.api_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

/// Delivers one GraphQL payload and returns the decoded JSON body.
pub trait GraphqlTransport {
    fn execute(&mut self, payload: &Value, token: &str) -> Result<TransportResponse>;
}

pub struct HttpTransport {
    client: Client,
    endpoint: String,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.graphql_endpoint(),
            user_agent: config.user_agent.clone(),
        })
    }
}

impl GraphqlTransport for HttpTransport {
    fn execute(&mut self, payload: &Value, token: &str) -> Result<TransportResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("bearer {token}"))
            .header("Accept", GRAPHQL_ACCEPT)
            .header("User-Agent", self.user_agent.clone())
            .json(payload)
            .send()
            .context("failed to call GitHub GraphQL API")?;
        let status = response.status().as_u16();
        let body: Value = response
            .json()
            .with_context(|| format!("failed to decode GraphQL response (HTTP {status})"))?;
        Ok(TransportResponse { status, body })
    }
}

/// Exponential backoff for retryable failures: `base * factor^(retry-1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(3),
            factor: 2.5,
        }
    }
}

impl RetryPolicy {
    /// Delay before 1-based retry `retry`, or `None` once the budget is spent.
    pub fn backoff(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        Some(self.base_delay.mul_f64(self.factor.powi(exponent)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Waiting(u32),
    Retrying(u32),
    Succeeded,
    Failed,
}

/// Per-request walk through `Idle -> Waiting(n) -> Retrying(n) -> Succeeded | Failed`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    retries: u32,
    state: RetryState,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: 0,
            state: RetryState::Idle,
        }
    }

    /// Record a failed attempt; returns the delay to wait, or `None` when exhausted.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.retries += 1;
        match self.policy.backoff(self.retries) {
            Some(delay) => {
                self.state = RetryState::Waiting(self.retries);
                Some(delay)
            }
            None => {
                self.state = RetryState::Failed;
                None
            }
        }
    }

    pub fn on_retry(&mut self) {
        self.state = RetryState::Retrying(self.retries);
    }

    pub fn on_success(&mut self) {
        self.state = RetryState::Succeeded;
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.retries
    }
}

enum Outcome {
    Data(Value),
    Retryable(Value),
    AuthFailure(String),
    Fatal(Value),
}

pub struct ApiClient {
    transport: Box<dyn GraphqlTransport>,
    credentials: CredentialManager,
    limiter: RateLimiter,
    clock: Rc<dyn Clock>,
    retry: RetryPolicy,
    request_count: usize,
}

impl ApiClient {
    pub fn new(
        transport: Box<dyn GraphqlTransport>,
        credentials: CredentialManager,
        limiter: RateLimiter,
        clock: Rc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            credentials,
            limiter,
            clock,
            retry,
            request_count: 0,
        }
    }

    /// Build a client against the real API and mint the first installation token.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let issuer = GithubAppIssuer::new(&config.api_url, &config.user_agent, timeout)?;
        let mut credentials = CredentialManager::from_env(Box::new(issuer));
        credentials.initialize()?;
        let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
        let limiter = RateLimiter::new(config.min_interval, Rc::clone(&clock));
        Ok(Self::new(
            Box::new(HttpTransport::new(config)?),
            credentials,
            limiter,
            clock,
            RetryPolicy::default(),
        ))
    }

    /// Run one query or mutation and return its `data` payload.
    pub fn request(&mut self, query: &str, variables: Value) -> Result<Value> {
        self.limiter.wait_if_needed();
        let payload = json!({ "query": query, "variables": variables });
        let mut token = self.credentials.get_token()?;
        let mut backoff = Backoff::new(self.retry);
        let mut refreshed = false;

        loop {
            self.request_count += 1;
            let failure = match self.attempt(&payload, &token) {
                Outcome::Data(data) => {
                    backoff.on_success();
                    return Ok(data);
                }
                Outcome::Retryable(failure) => failure,
                Outcome::AuthFailure(message) => {
                    if refreshed {
                        bail!(MigrateError::Auth(message));
                    }
                    refreshed = true;
                    warn!("authentication failure ({message}), refreshing token");
                    token = self
                        .credentials
                        .refresh_token()
                        .map_err(|error| MigrateError::Auth(format!("{error:#}")))?;
                    continue;
                }
                Outcome::Fatal(body) => {
                    error!("GraphQL response carried no data: {body}");
                    bail!(MigrateError::Api {
                        attempts: backoff.failures() + 1,
                        errors: body,
                    });
                }
            };

            match backoff.on_failure() {
                Some(delay) => {
                    warn!(
                        "GraphQL request failed, retrying {}/{} after {:.1}s: {failure}",
                        backoff.failures(),
                        self.retry.max_retries,
                        delay.as_secs_f64()
                    );
                    self.clock.sleep(delay);
                    backoff.on_retry();
                }
                None => {
                    error!("max retries exceeded, aborting request");
                    bail!(MigrateError::Api {
                        attempts: backoff.failures(),
                        errors: failure,
                    });
                }
            }
        }
    }

    fn attempt(&mut self, payload: &Value, token: &str) -> Outcome {
        let response = match self.transport.execute(payload, token) {
            Ok(response) => response,
            Err(error) => return Outcome::Retryable(Value::String(format!("{error:#}"))),
        };
        if let Some(errors) = response.body.get("errors") {
            return Outcome::Retryable(errors.clone());
        }
        if let Some(data) = response.body.get("data").filter(|data| !data.is_null()) {
            debug!("GraphQL request succeeded (HTTP {})", response.status);
            return Outcome::Data(data.clone());
        }
        if let Some(message) = auth_failure_message(&response) {
            return Outcome::AuthFailure(message);
        }
        if is_retryable_status(response.status) {
            return Outcome::Retryable(response.body);
        }
        Outcome::Fatal(response.body)
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }
}

fn auth_failure_message(response: &TransportResponse) -> Option<String> {
    let message = response
        .body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if response.status == StatusCode::UNAUTHORIZED.as_u16()
        || message.to_lowercase().contains("credentials")
    {
        Some(if message.is_empty() {
            format!("HTTP {}", response.status)
        } else {
            message.to_string()
        })
    } else {
        None
    }
}

fn is_retryable_status(status: u16) -> bool {
    StatusCode::from_u16(status).is_ok_and(|status| {
        matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    })
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
