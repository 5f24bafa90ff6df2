use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MigrateError;

pub const ENV_APP_ID: &str = "GHD_APP_ID";
pub const ENV_INSTALLATION_ID: &str = "GHD_INSTALLATION_ID";
pub const ENV_PRIVATE_KEY: &str = "GHD_PRIVATE_KEY";

const JWT_BACKDATE_SECS: i64 = 60;
const JWT_LIFETIME_SECS: i64 = 9 * 60;

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

/// GitHub App identity used to mint installation tokens.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: u64,
    pub installation_id: u64,
    pub private_key: String,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("installation_id", &self.installation_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl AppCredentials {
    /// Resolve credentials through `lookup`; the private key value is a path to a PEM file.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let (app_id, installation_id, key_path) = match (
            read(ENV_APP_ID),
            read(ENV_INSTALLATION_ID),
            read(ENV_PRIVATE_KEY),
        ) {
            (Some(app_id), Some(installation_id), Some(key_path)) => {
                (app_id, installation_id, key_path)
            }
            (app_id, installation_id, key_path) => {
                let missing = [
                    (ENV_APP_ID, app_id.is_none()),
                    (ENV_INSTALLATION_ID, installation_id.is_none()),
                    (ENV_PRIVATE_KEY, key_path.is_none()),
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(key, _)| key)
                .collect::<Vec<_>>();
                bail!(MigrateError::configuration(format!(
                    "{} must be set",
                    missing.join(", ")
                )));
            }
        };
        let app_id = parse_numeric(ENV_APP_ID, &app_id)?;
        let installation_id = parse_numeric(ENV_INSTALLATION_ID, &installation_id)?;
        let private_key = fs::read_to_string(&key_path).map_err(|error| {
            MigrateError::configuration(format!(
                "failed to read {ENV_PRIVATE_KEY} file {key_path}: {error}"
            ))
        })?;

        Ok(Self {
            app_id,
            installation_id,
            private_key,
        })
    }
}

fn parse_numeric(key: &str, value: &str) -> Result<u64> {
    if !value.chars().all(|ch| ch.is_ascii_digit()) {
        bail!(MigrateError::configuration(format!(
            "{key} must be numeric, got {value:?}"
        )));
    }
    value
        .parse::<u64>()
        .map_err(|_| MigrateError::configuration(format!("{key} is out of range: {value}")).into())
}

/// Exchanges app credentials for a bearer token.
pub trait TokenIssuer {
    fn issue(&mut self, credentials: &AppCredentials) -> Result<String>;
}

pub struct GithubAppIssuer {
    client: Client,
    api_url: String,
    user_agent: String,
}

impl GithubAppIssuer {
    pub fn new(api_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build GitHub token HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        })
    }

    fn app_jwt(&self, credentials: &AppCredentials) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - JWT_BACKDATE_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: credentials.app_id.to_string(),
        };
        let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes()).map_err(|error| {
            MigrateError::configuration(format!("{ENV_PRIVATE_KEY} is not a valid RSA PEM key: {error}"))
        })?;
        encode(&Header::new(Algorithm::RS256), &claims, &key).context("failed to sign app JWT")
    }
}

impl TokenIssuer for GithubAppIssuer {
    fn issue(&mut self, credentials: &AppCredentials) -> Result<String> {
        let jwt = self.app_jwt(credentials)?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, credentials.installation_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", self.user_agent.clone())
            .send()
            .context("failed to request installation token")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(MigrateError::Auth(format!(
                "installation token request failed with HTTP {status}: {body}"
            )));
        }
        let payload: InstallationToken = response
            .json()
            .context("failed to decode installation token response")?;
        Ok(payload.token)
    }
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
}

/// Owns the app credentials and the current bearer token.
pub struct CredentialManager {
    lookup: EnvLookup,
    issuer: Box<dyn TokenIssuer>,
    token: Option<String>,
}

impl CredentialManager {
    pub fn from_env(issuer: Box<dyn TokenIssuer>) -> Self {
        Self::with_lookup(Box::new(|key| env::var(key).ok()), issuer)
    }

    pub fn with_lookup(lookup: EnvLookup, issuer: Box<dyn TokenIssuer>) -> Self {
        Self {
            lookup,
            issuer,
            token: None,
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        let credentials = AppCredentials::from_lookup(self.lookup.as_ref())?;
        let token = self
            .issuer
            .issue(&credentials)
            .with_context(|| format!("failed to mint token for app {}", credentials.app_id))?;
        self.token = Some(token);
        info!("GitHub app authentication initialized");
        Ok(())
    }

    pub fn get_token(&self) -> Result<String> {
        self.token
            .clone()
            .ok_or_else(|| MigrateError::NotInitialized.into())
    }

    pub fn refresh_token(&mut self) -> Result<String> {
        warn!("refreshing GitHub app token");
        self.token = None;
        self.initialize()?;
        self.get_token()
    }

    pub fn is_initialized(&self) -> bool {
        self.token.is_some()
    }
}
