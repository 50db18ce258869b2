//! [`HttpSource`] – REST adapter for the fleet backend.
//!
//! Reads the robot registry, per-robot telemetry and alarms, and issues
//! registry writes.  Write requests carry the anti-forgery token and session
//! cookie supplied by the caller through [`SessionCredentials`].
//!
//! # Example
//!
//! ```rust,no_run
//! use robowatch_middleware::http_source::HttpSource;
//! use robowatch_middleware::TelemetrySource;
//!
//! # async fn demo() -> Result<(), robowatch_middleware::SourceError> {
//! let source = HttpSource::new("http://localhost:8000/api")?;
//! let robots = source.list_robots().await?;
//! println!("{} robots registered", robots.len());
//! # Ok(())
//! # }
//! ```

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::COOKIE;
use reqwest::{RequestBuilder, StatusCode, Url};
use robowatch_types::{
    Alarm, AlarmPage, NewRobot, OperationState, OperationUpdate, Robot, RobotUpdate, TelemetrySample,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::source::{RegistryWriter, SourceError, TelemetrySource};

/// Header carrying the anti-forgery token on write requests.
pub const CSRF_HEADER: &str = "X-CSRFToken";

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Session material forwarded on every write request.
#[derive(Clone, Default)]
pub struct SessionCredentials {
    pub csrf_token: Option<String>,
    /// Raw `Cookie` header value, e.g. `"csrftoken=…; sessionid=…"`.
    pub cookie: Option<String>,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "<redacted>" } else { "<not set>" };
        f.debug_struct("SessionCredentials")
            .field("csrf_token", &redact(&self.csrf_token))
            .field("cookie", &redact(&self.cookie))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpSource
// ─────────────────────────────────────────────────────────────────────────────

/// REST client implementing both [`TelemetrySource`] and [`RegistryWriter`].
///
/// Construct once and share behind an `Arc`; the inner `reqwest::Client`
/// pools connections.
pub struct HttpSource {
    base: Url,
    client: reqwest::Client,
    session: SessionCredentials,
}

impl HttpSource {
    /// Create a client for the API rooted at `base_url`
    /// (e.g. `"http://localhost:8000/api"`).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::BadResponse`] if `base_url` is not an absolute
    /// URL that can carry a path.
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        let base = Url::parse(base_url)
            .map_err(|e| SourceError::BadResponse(format!("invalid API base URL {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SourceError::BadResponse(format!(
                "API base URL {base_url:?} cannot carry a path"
            )));
        }
        Ok(Self {
            base,
            client: reqwest::Client::new(),
            session: SessionCredentials::default(),
        })
    }

    /// Use a preconfigured `reqwest::Client` (timeouts, proxies, …).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Attach the credentials forwarded on write requests.
    pub fn with_session(mut self, session: SessionCredentials) -> Self {
        self.session = session;
        self
    }

    /// The API base URL.
    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Build `<base>/<segments…>/`, percent-encoding every segment.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
            path.push("");
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(token) = &self.session.csrf_token {
            request = request.header(CSRF_HEADER, token);
        }
        if let Some(cookie) = &self.session.cookie {
            request = request.header(COOKIE, cookie);
        }
        request
    }

    /// Send `request` and return the status with the raw body.
    async fn execute(&self, endpoint: &str, request: RequestBuilder) -> Result<(StatusCode, String), SourceError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%endpoint, status = status.as_u16(), "source response");
        Ok((status, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<T, SourceError> {
        let (status, body) = self.execute(endpoint, request).await?;
        if !status.is_success() {
            return Err(rejected(endpoint, status, body));
        }
        parse_body(endpoint, &body)
    }

    async fn write(&self, endpoint: &str, request: RequestBuilder) -> Result<(), SourceError> {
        let (status, body) = self.execute(endpoint, self.authorize(request)).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(rejected(endpoint, status, body))
        }
    }
}

fn rejected(endpoint: &str, status: StatusCode, body: String) -> SourceError {
    SourceError::Rejected {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    }
}

fn parse_body<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|e| SourceError::BadResponse(format!("{endpoint}: {e}")))
}

#[async_trait]
impl TelemetrySource for HttpSource {
    async fn list_robots(&self) -> Result<Vec<Robot>, SourceError> {
        let url = self.endpoint(&["robots"]);
        self.get_json("robots/", self.client.get(url)).await
    }

    async fn latest_telemetry(&self, robot_id: &str) -> Result<Option<TelemetrySample>, SourceError> {
        let endpoint = format!("robot-data/{robot_id}/latest/");
        let url = self.endpoint(&["robot-data", robot_id, "latest"]);
        let (status, body) = self.execute(&endpoint, self.client.get(url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(rejected(&endpoint, status, body));
        }
        parse_body(&endpoint, &body).map(Some)
    }

    async fn alarms_after(&self, after: DateTime<Utc>) -> Result<Vec<Alarm>, SourceError> {
        let url = self.endpoint(&["alarms"]);
        let after = after.to_rfc3339_opts(SecondsFormat::Millis, true);
        self.get_json("alarms/", self.client.get(url).query(&[("after", after)]))
            .await
    }

    async fn alarm_page(&self, page: u32, per_page: u32) -> Result<AlarmPage, SourceError> {
        let url = self.endpoint(&["alarms", "paged"]);
        let request = self
            .client
            .get(url)
            .query(&[("page", page), ("per_page", per_page)]);
        self.get_json("alarms/paged/", request).await
    }
}

#[async_trait]
impl RegistryWriter for HttpSource {
    async fn add_robot(&self, robot: &NewRobot) -> Result<(), SourceError> {
        let url = self.endpoint(&["robots", "add"]);
        self.write("robots/add/", self.client.post(url).json(robot)).await
    }

    async fn update_robot(&self, robot_id: &str, update: &RobotUpdate) -> Result<(), SourceError> {
        let url = self.endpoint(&["robots", robot_id]);
        self.write(&format!("robots/{robot_id}/"), self.client.put(url).json(update))
            .await
    }

    async fn update_operation_state(&self, robot_id: &str, state: OperationState) -> Result<(), SourceError> {
        let url = self.endpoint(&["robots", robot_id, "operation"]);
        let body = OperationUpdate {
            operation_state: state,
        };
        self.write(&format!("robots/{robot_id}/operation/"), self.client.put(url).json(&body))
            .await
    }

    async fn remove_robot(&self, robot_id: &str) -> Result<(), SourceError> {
        let url = self.endpoint(&["robots", robot_id]);
        self.write(&format!("robots/{robot_id}/"), self.client.delete(url))
            .await
    }
}
