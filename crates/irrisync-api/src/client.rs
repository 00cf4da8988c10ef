// REST client for the irrigation service
//
// Wraps `reqwest::Client` with service URL construction, bearer-token
// auth, and decode-with-body error reporting. Endpoints are thin: the
// interesting state handling happens in irrisync-core.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{DeviceDto, PistonDto, ScheduleDto, ScheduleRequest, ToggleRequest, ValveState};
use crate::transport::TransportConfig;

/// HTTP client for the irrigation service's REST API.
///
/// All methods return decoded payloads; non-2xx responses become
/// [`Error::Server`] carrying whatever message body the server sent.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<SecretString>,
    timeout_secs: u64,
}

impl ApiClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the service root (e.g. `https://irrigation.example.com`).
    /// If `auth_token` is set, it is sent as a bearer token on every request.
    pub fn new(
        base_url: Url,
        auth_token: Option<SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            auth_token,
            timeout_secs: transport.timeout.as_secs(),
        })
    }

    /// Create a client with a pre-built `reqwest::Client` (tests).
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            auth_token: None,
            timeout_secs: 30,
        }
    }

    /// The service base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The push channel endpoint derived from the base URL
    /// (`ws(s)://{host}/ws/devices`).
    pub fn push_url(&self) -> Result<Url, Error> {
        let url = self.base_url.join("ws/devices")?;
        // `Url::set_scheme` refuses special -> non-special conversions,
        // so rewrite the scheme textually.
        let ws = match url.scheme() {
            "https" => url.as_str().replacen("https", "wss", 1),
            "http" => url.as_str().replacen("http", "ws", 1),
            "ws" | "wss" => url.as_str().to_owned(),
            other => {
                return Err(Error::ChannelConnect(format!(
                    "cannot derive push url from scheme {other}"
                )));
            }
        };
        Ok(Url::parse(&ws)?)
    }

    // ── Device endpoints ─────────────────────────────────────────────

    /// Fetch the full device list.
    pub async fn list_devices(&self) -> Result<Vec<DeviceDto>, Error> {
        self.get(self.api_url("devices")?).await
    }

    /// Fetch a single device by id.
    pub async fn get_device(&self, device_id: &str) -> Result<DeviceDto, Error> {
        self.get(self.api_url(&format!("devices/{device_id}"))?).await
    }

    /// Toggle one piston to the desired state. Returns the updated piston.
    pub async fn toggle_piston(
        &self,
        device_id: &str,
        piston_number: u32,
        desired: ValveState,
    ) -> Result<PistonDto, Error> {
        let url = self.api_url(&format!("devices/{device_id}/pistons/{piston_number}/toggle"))?;
        self.post(url, &ToggleRequest { state: desired }).await
    }

    // ── Schedule endpoints ───────────────────────────────────────────

    /// Fetch all schedules for the account.
    pub async fn list_schedules(&self) -> Result<Vec<ScheduleDto>, Error> {
        self.get(self.api_url("schedules")?).await
    }

    /// Create a new schedule.
    pub async fn create_schedule(&self, req: &ScheduleRequest) -> Result<ScheduleDto, Error> {
        self.post(self.api_url("schedules")?, req).await
    }

    /// Update an existing schedule.
    pub async fn update_schedule(
        &self,
        schedule_id: &str,
        req: &ScheduleRequest,
    ) -> Result<ScheduleDto, Error> {
        self.put(self.api_url(&format!("schedules/{schedule_id}"))?, req)
            .await
    }

    /// Delete a schedule.
    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<(), Error> {
        let url = self.api_url(&format!("schedules/{schedule_id}"))?;
        debug!(%url, "DELETE");
        let resp = self.authed(self.http.delete(url)).send().await.map_err(|e| self.map_send_err(e))?;
        Self::check_status(resp).await.map(|_| ())
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Build a full URL for an API path: `{base}/api/{path}`.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(&format!("api/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!(%url, "GET");
        let resp = self.authed(self.http.get(url)).send().await.map_err(|e| self.map_send_err(e))?;
        Self::decode(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, url: Url, body: &impl Serialize) -> Result<T, Error> {
        debug!(%url, "POST");
        let resp = self
            .authed(self.http.post(url).json(body))
            .send()
            .await
            .map_err(|e| self.map_send_err(e))?;
        Self::decode(resp).await
    }

    async fn put<T: DeserializeOwned>(&self, url: Url, body: &impl Serialize) -> Result<T, Error> {
        debug!(%url, "PUT");
        let resp = self
            .authed(self.http.put(url).json(body))
            .send()
            .await
            .map_err(|e| self.map_send_err(e))?;
        Self::decode(resp).await
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    fn map_send_err(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(e)
        }
    }

    /// Reject non-2xx responses, preserving the body as the message.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp
            .text()
            .await
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_owned()
            });
        Err(Error::Server {
            status: status.as_u16(),
            message,
        })
    }

    /// Decode a JSON body, keeping the raw text around for diagnostics.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let resp = Self::check_status(resp).await?;
        if resp.status() == StatusCode::NO_CONTENT {
            // Serde can produce () and Option<T> from null.
            return serde_json::from_str("null").map_err(|e| Error::Decode {
                message: e.to_string(),
                body: String::new(),
            });
        }
        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Decode {
            message: e.to_string(),
            body,
        })
    }
}
