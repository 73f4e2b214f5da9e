//! REST client for the volunteer events backend
//!
//! Every request carries the configured timeout, so a hung server surfaces as
//! `FetchError::Http` and the loader can fall back to the cache.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::FetchError;
use crate::events::{Event, NewEvent};
use crate::session::Session;

/// Default backend used when none is configured
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    user_id: &'a str,
}

/// Client for the events REST API
#[derive(Debug, Clone)]
pub struct EventsClient {
    http_client: Client,
    /// Base URL without a trailing slash
    base_url: String,
    timeout: Duration,
}

impl Default for EventsClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, Duration::from_secs(10))
    }
}

impl EventsClient {
    /// Creates a client for `base_url` with a per-request `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(Client::new(), base_url, timeout)
    }

    /// Creates a client reusing an existing HTTP client
    pub fn with_client(http_client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds `{base}/{segments...}`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| FetchError::Other(format!("invalid API URL '{}': {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|()| FetchError::Other(format!("API URL '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetches every event known to the backend
    pub async fn fetch_events(&self) -> Result<Vec<Event>, FetchError> {
        debug!(base_url = %self.base_url, "fetching events");
        let request = self.http_client.get(self.endpoint(&["events"])?);
        self.send_json(request).await
    }

    /// Creates a new event as the logged-in user
    pub async fn create_event(
        &self,
        session: &Session,
        event: &NewEvent,
    ) -> Result<Event, FetchError> {
        let request = self
            .http_client
            .post(self.endpoint(&["events"])?)
            .bearer_auth(&session.token)
            .json(event);
        self.send_json(request).await
    }

    /// Signs the logged-in user up as a volunteer for `event_id`
    ///
    /// Returns the updated event.
    pub async fn join_event(&self, session: &Session, event_id: &str) -> Result<Event, FetchError> {
        let request = self
            .http_client
            .post(self.endpoint(&["events", event_id, "volunteers"])?)
            .bearer_auth(&session.token)
            .json(&JoinRequest {
                user_id: &session.user_id,
            });
        self.send_json(request).await
    }

    /// Exchanges credentials for a session
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, FetchError> {
        let request = self
            .http_client
            .post(self.endpoint(&["auth", "login"])?)
            .json(&LoginRequest { email, password });
        self.send_json(request).await
    }

    /// Sends `request` and decodes a 2xx JSON body
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, FetchError> {
        let response = request.timeout(self.timeout).send().await?;
        let text = check_status(response).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Turns a non-2xx response into `FetchError::Status`
async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Position;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(mock_server: &MockServer) -> EventsClient {
        EventsClient::new(mock_server.uri(), Duration::from_secs(5))
    }

    fn session() -> Session {
        Session {
            token: "test-token".to_string(),
            user_id: "u1".to_string(),
        }
    }

    fn event_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": "Beach Cleanup",
            "description": "",
            "dateTime": "2025-12-01T14:30:00.000Z",
            "position": {"latitude": 51.0447, "longitude": -114.0719},
            "volunteersNeeded": 4,
            "volunteersIds": []
        })
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = EventsClient::new("http://example.test/api/", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://example.test/api");
        assert_eq!(
            client.endpoint(&["events"]).unwrap().as_str(),
            "http://example.test/api/events"
        );
    }

    #[test]
    fn test_endpoint_on_bare_host() {
        let client = EventsClient::new("http://example.test", Duration::from_secs(1));
        assert_eq!(
            client.endpoint(&["auth", "login"]).unwrap().as_str(),
            "http://example.test/auth/login"
        );
    }

    #[test]
    fn test_endpoint_rejects_unusable_base() {
        let client = EventsClient::new("not a url", Duration::from_secs(1));
        assert!(matches!(client.endpoint(&["events"]), Err(FetchError::Other(_))));
    }

    #[tokio::test]
    async fn test_fetch_events_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([event_json("1")])))
            .mount(&mock_server)
            .await;

        let events = create_test_client(&mock_server)
            .fetch_events()
            .await
            .expect("Fetch should succeed");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "1");
        assert_eq!(events[0].volunteers_needed, 4);
    }

    #[tokio::test]
    async fn test_fetch_events_server_error_maps_to_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        let err = create_test_client(&mock_server)
            .fetch_events()
            .await
            .unwrap_err();

        match err {
            FetchError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("Expected Status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_events_bad_json_maps_to_decode() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\": \"a list\"}"))
            .mount(&mock_server)
            .await;

        let err = create_test_client(&mock_server)
            .fetch_events()
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_events_timeout_maps_to_http() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let client = EventsClient::new(mock_server.uri(), Duration::from_millis(50));
        let err = client.fetch_events().await.unwrap_err();

        assert!(matches!(err, FetchError::Http(_)));
    }

    #[tokio::test]
    async fn test_create_event_sends_bearer_token_and_payload() {
        let mock_server = MockServer::start().await;
        let new_event = NewEvent {
            name: "Beach Cleanup".to_string(),
            description: "".to_string(),
            date_time: Utc.with_ymd_and_hms(2025, 12, 1, 14, 30, 0).unwrap(),
            position: Position {
                latitude: 51.0447,
                longitude: -114.0719,
            },
            image_url: None,
            volunteers_needed: 4,
        };

        Mock::given(method("POST"))
            .and(path("/events"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({
                "name": "Beach Cleanup",
                "description": "",
                "dateTime": "2025-12-01T14:30:00Z",
                "position": {"latitude": 51.0447, "longitude": -114.0719},
                "volunteersNeeded": 4
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(event_json("42")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let created = create_test_client(&mock_server)
            .create_event(&session(), &new_event)
            .await
            .expect("Create should succeed");

        assert_eq!(created.id, "42");
    }

    #[tokio::test]
    async fn test_join_event_posts_user_id() {
        let mock_server = MockServer::start().await;
        let mut joined = event_json("7");
        joined["volunteersIds"] = json!(["u1"]);

        Mock::given(method("POST"))
            .and(path("/events/7/volunteers"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({"userId": "u1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(joined))
            .mount(&mock_server)
            .await;

        let event = create_test_client(&mock_server)
            .join_event(&session(), "7")
            .await
            .expect("Join should succeed");

        assert!(event.has_volunteer("u1"));
    }

    #[tokio::test]
    async fn test_join_event_encodes_id_as_one_segment() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events/a%2F..%2F..%2Fauth%2Flogin/volunteers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_json("x")))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t", "userId": "u"})))
            .expect(0)
            .mount(&mock_server)
            .await;

        create_test_client(&mock_server)
            .join_event(&session(), "a/../../auth/login")
            .await
            .expect("Join should reach the volunteers endpoint");
    }

    #[tokio::test]
    async fn test_login_returns_session() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"email": "a@b.c", "password": "pw"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "t", "userId": "u9"})),
            )
            .mount(&mock_server)
            .await;

        let session = create_test_client(&mock_server)
            .login("a@b.c", "pw")
            .await
            .expect("Login should succeed");

        assert_eq!(session.token, "t");
        assert_eq!(session.user_id, "u9");
    }

    #[tokio::test]
    async fn test_login_rejected_maps_to_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let err = create_test_client(&mock_server)
            .login("a@b.c", "wrong")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 401, .. }));
    }
}
