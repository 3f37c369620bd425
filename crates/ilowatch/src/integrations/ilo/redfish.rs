//! Redfish transport for the remote health client.
//!
//! Each call logs in (`SessionService/Sessions`), performs its requests with the
//! session token, and deletes the session again. A `Session` that is dropped
//! without being closed (an error path the `?` operator skipped over, or a
//! cancelled future) deletes itself from a background task.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;

use super::client::ClientError;
use super::client::Connector;
use super::client::HealthClient;
use super::client::PowerAction;
use super::config::ConnectionParams;
use super::snapshot::FanReading;
use super::snapshot::PowerStatus;
use super::snapshot::Reading;
use super::snapshot::Scalar;
use super::snapshot::SensorStatus;
use super::snapshot::Snapshot;
use super::snapshot::TemperatureReading;
use super::snapshot::DEFAULT_HEALTH;

const SESSIONS_PATH: &str = "/redfish/v1/SessionService/Sessions";
const SYSTEM_PATH: &str = "/redfish/v1/Systems/1";
const THERMAL_PATH: &str = "/redfish/v1/Chassis/1/Thermal";
const POWER_PATH: &str = "/redfish/v1/Chassis/1/Power";
const MANAGER_PATH: &str = "/redfish/v1/Managers/1";
const RESET_PATH: &str = "/redfish/v1/Systems/1/Actions/ComputerSystem.Reset";
/// Press-and-hold is an OEM action; iLO 5 and later publish it under `Hpe`
const HPE_POWER_BUTTON_PATH: &str =
    "/redfish/v1/Systems/1/Actions/Oem/Hpe/HpeComputerSystemExt.PowerButton/";
/// iLO 4
const HP_POWER_BUTTON_PATH: &str =
    "/redfish/v1/Systems/1/Actions/Oem/Hp/HpComputerSystemExt.PowerButton/";

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Where an action is posted and with which body.
///
/// Targets are tried in order, moving on only when the controller answers 404,
/// so at most one of them accepts the write.
struct ActionRequest {
    targets: &'static [&'static str],
    body: serde_json::Value,
}

fn action_request(action: PowerAction) -> ActionRequest {
    let reset = |reset_type: &str| ActionRequest {
        targets: &[RESET_PATH],
        body: serde_json::json!({ "ResetType": reset_type }),
    };
    match action {
        PowerAction::PowerOn => reset("On"),
        PowerAction::RebootWarm => reset("ForceRestart"),
        PowerAction::ShutdownGraceful => reset("PushPowerButton"),
        // Holds the power button rather than cutting power outright
        PowerAction::ShutdownHard => ActionRequest {
            targets: &[HPE_POWER_BUTTON_PATH, HP_POWER_BUTTON_PATH],
            body: serde_json::json!({ "PushType": "PressAndHold" }),
        },
    }
}

/// Builds a `RedfishClient` per call site
#[derive(Debug, Clone, Copy, Default)]
pub struct RedfishConnector;

impl Connector for RedfishConnector {
    type Client = RedfishClient;

    fn connect(&self, params: &ConnectionParams) -> Result<RedfishClient, ClientError> {
        RedfishClient::new(params)
    }
}

/// Redfish implementation of `HealthClient`
pub struct RedfishClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl RedfishClient {
    pub fn new(params: &ConnectionParams) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(params.timeout)
            .danger_accept_invalid_certs(!params.verify_tls)
            // Sessions are per call, so are connections
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| {
                ClientError::Unreachable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: params.base_url(),
            username: params.username.clone(),
            password: params.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn login(&self) -> Result<Session, ClientError> {
        let body = serde_json::json!({
            "UserName": self.username,
            "Password": self.password,
        });

        let resp = self
            .http
            .post(self.url(SESSIONS_PATH))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Auth(format!("login rejected with {}", status)));
        }
        if !status.is_success() {
            return Err(ClientError::Protocol(format!("login returned {}", status)));
        }

        let token = resp
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::Protocol("login response carried no session token".into())
            })?;
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Some firmware only names the session in the body.
        let location = match location {
            Some(l) => Some(l),
            None => resp
                .json::<ODataRef>()
                .await
                .ok()
                .and_then(|r| r.odata_id),
        };

        if location.is_none() {
            warn!(
                "Redfish session on {} has no Location; it cannot be deleted and will \
                 stay open until the controller expires it",
                self.base_url
            );
        }

        debug!("Opened Redfish session on {}", self.base_url);
        Ok(Session {
            http: self.http.clone(),
            token,
            location: location.map(|l| self.url(&l)),
        })
    }

    async fn post_action(
        &self,
        session: &Session,
        action: PowerAction,
    ) -> Result<(), ClientError> {
        let request = action_request(action);
        let (last, earlier) = request
            .targets
            .split_last()
            .ok_or_else(|| ClientError::Protocol(format!("no target for {}", action)))?;

        for target in earlier {
            let resp = session.post(&self.url(target), &request.body).await?;
            if resp.status() != StatusCode::NOT_FOUND {
                return check_status(resp).map(|_| ());
            }
            debug!("{} not offered at {}, trying the next target", action, target);
        }
        let resp = session.post(&self.url(last), &request.body).await?;
        check_status(resp).map(|_| ())
    }

    async fn read_snapshot(&self, session: &Session) -> Result<Snapshot, ClientError> {
        let system: SystemDocument = session.get(&self.url(SYSTEM_PATH)).await?;
        let thermal: ThermalDocument = session.get(&self.url(THERMAL_PATH)).await?;
        let power: PowerDocument = session.get(&self.url(POWER_PATH)).await?;
        let mut snapshot = parse_snapshot(system, thermal, power)?;

        // Only device metadata lives here; a controller without it is still healthy.
        let manager = session.get::<ManagerDocument>(&self.url(MANAGER_PATH)).await;
        snapshot.firmware_version = match manager {
            Ok(manager) => manager.firmware_version,
            Err(e @ ClientError::Auth(_)) => return Err(e),
            Err(e) => {
                debug!("No manager document on {}: {}", self.base_url, e);
                None
            }
        };
        Ok(snapshot)
    }
}

#[async_trait]
impl HealthClient for RedfishClient {
    async fn fetch(&self) -> Result<Snapshot, ClientError> {
        let session = self.login().await?;
        let result = self.read_snapshot(&session).await;
        session.close().await;
        result
    }

    async fn send_action(&self, action: PowerAction) -> Result<(), ClientError> {
        let session = self.login().await?;
        let result = self.post_action(&session, action).await;
        session.close().await;
        result
    }
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Unreachable(format!("request timed out: {}", e))
    } else {
        ClientError::Unreachable(e.to_string())
    }
}

/// An open Redfish session
struct Session {
    http: reqwest::Client,
    token: String,
    /// Absolute URL of the session resource; `None` once closed
    location: Option<String>,
}

impl Session {
    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        let resp = self
            .http
            .get(url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp)?;

        resp.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                ClientError::Protocol(format!("malformed document at {}: {}", url, e))
            } else {
                transport_error(e)
            }
        })
    }

    /// POST without interpreting the status, so callers can fall back on 404.
    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ClientError> {
        self.http
            .post(url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)
    }

    /// Delete the session on the controller. Failures are logged only: the
    /// controller expires the session eventually.
    async fn close(mut self) {
        if let Some(location) = self.location.take() {
            delete_session(&self.http, &location, &self.token).await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(location) = self.location.take() else {
            return;
        };
        let http = self.http.clone();
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    delete_session(&http, &location, &token).await;
                });
            }
            Err(_) => warn!("Leaking Redfish session {}: no runtime to close it", location),
        }
    }
}

async fn delete_session(http: &reqwest::Client, location: &str, token: &str) {
    match http
        .delete(location)
        .header(AUTH_TOKEN_HEADER, token)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => debug!("Closed Redfish session {}", location),
        Ok(resp) => warn!(
            "Closing Redfish session {} returned {}",
            location,
            resp.status()
        ),
        Err(e) => warn!("Failed to close Redfish session {}: {}", location, e),
    }
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(ClientError::Auth(format!(
            "{} rejected with {}",
            resp.url().path(),
            status
        )))
    } else if !status.is_success() {
        Err(ClientError::Protocol(format!(
            "{} returned {}",
            resp.url().path(),
            status
        )))
    } else {
        Ok(resp)
    }
}

#[derive(Debug, Deserialize)]
struct ODataRef {
    #[serde(rename = "@odata.id")]
    odata_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusDocument {
    state: Option<String>,
    health: Option<String>,
    health_rollup: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemDocument {
    power_state: Option<String>,
    serial_number: Option<String>,
    model: Option<String>,
    #[serde(default)]
    status: StatusDocument,
    #[serde(default)]
    oem: SystemOem,
}

#[derive(Debug, Default, Deserialize)]
struct SystemOem {
    /// iLO 5 and later
    #[serde(rename = "Hpe")]
    hpe: Option<HpeSystemOem>,
    /// iLO 4
    #[serde(rename = "Hp")]
    hp: Option<HpeSystemOem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HpeSystemOem {
    power_on_minutes: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ThermalDocument {
    #[serde(default)]
    temperatures: Vec<TemperatureDocument>,
    #[serde(default)]
    fans: Vec<FanDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemperatureDocument {
    name: Option<String>,
    member_id: Option<String>,
    reading_celsius: Option<f64>,
    #[serde(default)]
    status: StatusDocument,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FanDocument {
    name: Option<String>,
    /// iLO 4 naming
    fan_name: Option<String>,
    member_id: Option<String>,
    reading: Option<f64>,
    /// iLO 4 naming
    current_reading: Option<f64>,
    reading_units: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManagerDocument {
    firmware_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PowerDocument {
    #[serde(default)]
    power_control: Vec<PowerControlDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PowerControlDocument {
    power_consumed_watts: Option<f64>,
}

/// Insert under `label`, disambiguating repeated labels instead of dropping readings.
fn insert_unique<T>(map: &mut BTreeMap<String, T>, label: String, value: T) {
    if !map.contains_key(&label) {
        map.insert(label, value);
        return;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{} #{}", label, n);
        if !map.contains_key(&candidate) {
            map.insert(candidate, value);
            return;
        }
        n += 1;
    }
}

fn parse_snapshot(
    system: SystemDocument,
    thermal: ThermalDocument,
    power: PowerDocument,
) -> Result<Snapshot, ClientError> {
    let mut temperatures = BTreeMap::new();
    for t in thermal.temperatures {
        let label = t.name.or(t.member_id).ok_or_else(|| {
            ClientError::Protocol("temperature sensor without Name or MemberId".into())
        })?;
        let status = match (&t.status.state, &t.status.health) {
            (Some(state), _) if state.eq_ignore_ascii_case("absent") => SensorStatus::NotInstalled,
            (_, Some(health)) => SensorStatus::from(health.as_str()),
            (Some(state), None) => SensorStatus::Other(state.clone()),
            (None, None) => SensorStatus::Ok,
        };
        let current = match status {
            SensorStatus::NotInstalled => None,
            _ => t.reading_celsius.map(|c| Reading::Bare(Scalar::Number(c))),
        };
        insert_unique(
            &mut temperatures,
            label,
            TemperatureReading { current, status },
        );
    }

    let mut fans = BTreeMap::new();
    for f in thermal.fans {
        let label = f
            .name
            .or(f.fan_name)
            .or(f.member_id)
            .ok_or_else(|| ClientError::Protocol("fan without Name or MemberId".into()))?;
        let speed = f.reading.or(f.current_reading).map(|v| match f.reading_units {
            Some(units) => Reading::Tagged(Scalar::Number(v), units),
            None => Reading::Bare(Scalar::Number(v)),
        });
        insert_unique(&mut fans, label, FanReading { speed });
    }

    let power_on_minutes = system
        .oem
        .hpe
        .as_ref()
        .or(system.oem.hp.as_ref())
        .and_then(|o| o.power_on_minutes)
        .ok_or_else(|| ClientError::Protocol("system document has no PowerOnMinutes".into()))?;

    let power_draw_watts = power
        .power_control
        .first()
        .and_then(|c| c.power_consumed_watts)
        .filter(|w| w.is_finite() && *w >= 0.0)
        .map(|w| w.round() as u64);

    let health = system
        .status
        .health_rollup
        .or(system.status.health)
        .unwrap_or_else(|| DEFAULT_HEALTH.to_string());

    Ok(Snapshot {
        temperatures,
        fans,
        power_status: system
            .power_state
            .as_deref()
            .map(PowerStatus::from)
            .unwrap_or(PowerStatus::Unknown),
        power_on_minutes,
        power_draw_watts,
        health,
        serial_number: system.serial_number.filter(|s| !s.trim().is_empty()),
        model: system.model,
        firmware_version: None,
    })
}
