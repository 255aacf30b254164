//! Credential minting through the Lutron cloud.
//!
//! Opening a broker connection requires [`BrokerCredentials`]: an access
//! token scoped to one broker endpoint. Minting them is a multi-step
//! exchange with the cloud (password grant → device list → broker list →
//! broker authenticate) collapsed here into one
//! [`CredentialMinter::mint`] operation. Minted credentials are persisted
//! by the caller and reused across process restarts until the broker
//! rejects them.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::Error;

/// Production cloud endpoint for the credential exchange.
pub const DEFAULT_CLOUD_BASE: &str = "https://device-login.lutron.com";

/// Deadline for each individual cloud request, so a hung identity
/// provider cannot stall minting indefinitely.
pub const CLOUD_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

// ── BrokerCredentials ────────────────────────────────────────────────

/// The serializable identity artifact required to open a broker
/// connection. Opaque to everything except the transport and the state
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerCredentials {
    /// WebSocket endpoint of the broker this token is scoped to.
    pub broker_url: Url,

    /// Serial number of the device (bridge) the broker fronts.
    pub device_serial: String,

    /// Bearer token presented on the WebSocket upgrade.
    pub access_token: String,
}

// ── CredentialMinter ─────────────────────────────────────────────────

/// Obtains fresh [`BrokerCredentials`] from the identity provider.
///
/// Consumed by the session layer whenever persisted credentials are
/// absent or rejected.
#[async_trait]
pub trait CredentialMinter: Send + Sync {
    async fn mint(&self) -> Result<BrokerCredentials, Error>;
}

// ── Cloud response shapes ────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct CloudDevice {
    serial_number: String,
}

#[derive(Deserialize)]
struct DeviceBrokers {
    #[serde(default)]
    available_brokers: Vec<AvailableBroker>,
}

#[derive(Deserialize)]
struct AvailableBroker {
    url: Url,
}

#[derive(Deserialize)]
struct BrokerAuthResponse {
    token: String,
}

// ── CloudAuthenticator ───────────────────────────────────────────────

/// [`CredentialMinter`] backed by the Lutron cloud HTTP API.
pub struct CloudAuthenticator {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
}

impl CloudAuthenticator {
    /// Build against the production cloud endpoint.
    pub fn new(username: impl Into<String>, password: SecretString) -> Result<Self, Error> {
        Self::with_base_url(DEFAULT_CLOUD_BASE, username, password)
    }

    /// Build against an explicit endpoint (tests point this at a mock
    /// server).
    pub fn with_base_url(
        base_url: &str,
        username: impl Into<String>,
        password: SecretString,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(base_url).map_err(|e| Error::authentication(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(CLOUD_REQUEST_TIMEOUT)
            .build()
            .map_err(Error::transport)?;
        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password,
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::authentication(format!("invalid cloud path {path}: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Error::transport)?;
        Self::decode(path, response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!(%url, "POST");
        let mut request = self.http.post(url).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(Error::transport)?;
        Self::decode(path, response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, Error> {
        let status = response.status();
        let text = response.text().await.map_err(Error::transport)?;
        if !status.is_success() {
            return Err(Error::authentication(format!(
                "cloud request {path} failed (HTTP {}): {text}",
                status.as_u16()
            )));
        }
        serde_json::from_str(&text).map_err(|e| Error::Decode {
            url: path.into(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl CredentialMinter for CloudAuthenticator {
    /// Run the full exchange. Any cardinality other than exactly one
    /// eligible device and exactly one broker record is a hard error,
    /// never a selection heuristic.
    async fn mint(&self) -> Result<BrokerCredentials, Error> {
        let token: TokenResponse = self
            .post_json(
                "oauth/token",
                None,
                &json!({
                    "grant_type": "password",
                    "username": self.username,
                    "password": self.password.expose_secret(),
                }),
            )
            .await?;

        let devices: Vec<CloudDevice> = self.get_json("devices", &token.access_token).await?;
        if devices.len() != 1 {
            return Err(Error::authentication(format!(
                "expected exactly one device but found {}",
                devices.len()
            )));
        }
        let serial = &devices[0].serial_number;
        debug!(%serial, "resolved device");

        let brokers: Vec<DeviceBrokers> = self
            .get_json(&format!("devices/{serial}/brokers"), &token.access_token)
            .await?;
        if brokers.len() != 1 {
            return Err(Error::authentication(format!(
                "expected exactly one broker record but found {}",
                brokers.len()
            )));
        }
        let Some(broker) = brokers[0].available_brokers.first() else {
            return Err(Error::authentication("no available brokers found"));
        };

        let auth: BrokerAuthResponse = self
            .post_json(
                &format!("devices/{serial}/brokers/authenticate"),
                Some(&token.access_token),
                &json!({ "broker": broker.url }),
            )
            .await?;
        debug!(broker = %broker.url, "broker authentication succeeded");

        Ok(BrokerCredentials {
            broker_url: broker.url.clone(),
            device_serial: serial.clone(),
            access_token: auth.token,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn credentials_round_trip_through_json() {
        let credentials = BrokerCredentials {
            broker_url: Url::parse("wss://broker.example.net/leap").unwrap(),
            device_serial: "01F2A3B4".into(),
            access_token: "tok-123".into(),
        };

        let text = serde_json::to_string(&credentials).unwrap();
        let back: BrokerCredentials = serde_json::from_str(&text).unwrap();
        assert_eq!(back, credentials);
    }
}
