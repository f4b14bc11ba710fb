use crate::device_client::{DeviceClient, MeterReading, MetersSnapshot};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const DEFAULT_EMAIL: &str = "tesla@example.com";
pub const DEFAULT_TIMEZONE: &str = "America/Toronto";

const LOGIN_PATH: &str = "/api/login/Basic";
const AGGREGATES_PATH: &str = "/api/meters/aggregates";
const SOE_PATH: &str = "/api/system_status/soe";
const GRID_STATUS_PATH: &str = "/api/system_status/grid_status";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// Numeric grid states
const GRID_UP: i8 = 1;
const GRID_DOWN: i8 = 0;
const GRID_SYNCING: i8 = -1;

/// Client for the local web API of a Powerwall 3 gateway
pub struct PowerwallApi {
    endpoint_url: String,
    password: String,
    email: String,
    timezone: String,
    token: RwLock<Option<String>>,
    client: reqwest::Client,
}

impl PowerwallApi {
    pub fn new(host: &str, password: &str) -> anyhow::Result<Self> {
        Self::with_identity(host, password, DEFAULT_EMAIL, DEFAULT_TIMEZONE)
    }

    pub fn with_identity(
        host: &str,
        password: &str,
        email: &str,
        timezone: &str,
    ) -> anyhow::Result<Self> {
        // The gateway only ships a self-signed certificate
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            endpoint_url: base_url(host),
            password: password.to_string(),
            email: email.to_string(),
            timezone: timezone.to_string(),
            token: RwLock::new(None),
            client,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    async fn login(&self) -> anyhow::Result<bool> {
        let response = self
            .client
            .post(format!("{}{}", self.endpoint_url, LOGIN_PATH))
            .json(&LoginRequest {
                username: "customer",
                password: &self.password,
                email: &self.email,
                client_info: ClientInfo {
                    timezone: &self.timezone,
                },
            })
            .send()
            .await?;

        if is_auth_rejection(response.status()) {
            warn!(status = %response.status(), "Powerwall rejected login");
            *self.token.write().await = None;
            return Ok(false);
        }

        let login: LoginResponse = response.error_for_status()?.json().await?;
        *self.token.write().await = Some(login.token);
        debug!(endpoint = %self.endpoint_url, "logged in to Powerwall");
        Ok(true)
    }

    /// GETs a JSON document, logging in again once if the session was rejected
    async fn get_json(&self, path: &str) -> anyhow::Result<Value> {
        let mut response = self.send_get(path).await?;
        if is_auth_rejection(response.status()) {
            debug!(path, "session rejected, logging in again");
            if !self.login().await? {
                anyhow::bail!("Powerwall rejected credentials");
            }
            response = self.send_get(path).await?;
        }
        Ok(response.error_for_status()?.json().await?)
    }

    async fn send_get(&self, path: &str) -> reqwest::Result<Response> {
        let token = self.token.read().await.clone();
        let mut request = self
            .client
            .get(format!("{}{}", self.endpoint_url, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await
    }
}

#[async_trait]
impl DeviceClient for PowerwallApi {
    async fn authenticate(&self) -> anyhow::Result<bool> {
        self.login().await
    }

    async fn fetch_meters(&self) -> anyhow::Result<Option<MetersSnapshot>> {
        let aggregates = self.get_json(AGGREGATES_PATH).await?;
        Ok(meters_from_aggregates(aggregates))
    }

    async fn fetch_battery_level(&self) -> anyhow::Result<Option<f64>> {
        let soe = self.get_json(SOE_PATH).await?;
        Ok(battery_level_from_soe(&soe))
    }

    async fn fetch_grid_connected(&self) -> anyhow::Result<Option<bool>> {
        let status = self.get_json(GRID_STATUS_PATH).await?;
        Ok(grid_connected_from_status(&status))
    }
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn meters_from_aggregates(aggregates: Value) -> Option<MetersSnapshot> {
    match serde_json::from_value::<AggregatesResponse>(aggregates) {
        Ok(aggregates) => Some(aggregates.into()),
        Err(e) => {
            warn!("Unexpected meter aggregates response: {e}");
            None
        }
    }
}

/// Rescales the raw state of energy the way the Tesla app displays it,
/// hiding the 5% reserve the gateway keeps back
fn scale_battery_level(percentage: f64) -> f64 {
    (percentage / 0.95) - (5.0 / 0.95)
}

fn battery_level_from_soe(soe: &Value) -> Option<f64> {
    let level = scale_battery_level(soe.get("percentage")?.as_f64()?);
    // Zero is indistinguishable from "no reading"
    if level == 0.0 {
        return None;
    }
    Some(level)
}

fn grid_status_code(state: &str) -> Option<i8> {
    match state {
        "SystemGridConnected" => Some(GRID_UP),
        "SystemIslandedActive" | "SystemMicroGridFaulted" | "SystemWaitForUser" => Some(GRID_DOWN),
        "SystemTransitionToGrid" | "SystemTransitionToIsland" | "SystemIslandedReady" => {
            Some(GRID_SYNCING)
        }
        _ => None,
    }
}

fn grid_connected_from_status(status: &Value) -> Option<bool> {
    let state = status.get("grid_status")?.as_str()?;
    match grid_status_code(state) {
        // GRID_DOWN is a real reading and yields `false`; only an unknown state is absent
        Some(code) => Some(code == GRID_UP),
        None => {
            warn!(state, "Unknown grid status");
            None
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'static str,
    password: &'a str,
    email: &'a str,
    #[serde(rename = "clientInfo")]
    client_info: ClientInfo<'a>,
}

#[derive(Debug, Serialize)]
struct ClientInfo<'a> {
    timezone: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct AggregatesResponse {
    battery: RawMeter,
    site: RawMeter,
    load: RawMeter,
    solar: RawMeter,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RawMeter {
    instant_power: f64,
    energy_imported: f64,
    energy_exported: f64,
}

impl From<RawMeter> for MeterReading {
    fn from(raw: RawMeter) -> Self {
        Self {
            power: raw.instant_power,
            energy_imported: raw.energy_imported,
            energy_exported: raw.energy_exported,
        }
    }
}

impl From<AggregatesResponse> for MetersSnapshot {
    fn from(raw: AggregatesResponse) -> Self {
        Self {
            battery: raw.battery.into(),
            grid: raw.site.into(),
            load: raw.load.into(),
            solar: raw.solar.into(),
        }
    }
}
