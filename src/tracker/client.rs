use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::Result;
use crate::error::{ConfigError, Error, TrackerError};
use crate::fields::FieldSet;

use super::TicketTracker;
use super::models::{
    CommentRequest, CreateRequest, CreateResponse, RawCreate, RawSearch, SearchResult,
    body_preview,
};

const CORRELATION_HEADER: &str = "x-correlation-id";
const API_PREFIX: &str = "rest/api/2/";

/// Jira REST v2 client authenticating with basic credentials.
#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: SecretString,
}

impl JiraClient {
    /// Build a `JiraClient` for the tracker rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if HTTPS is required but the URL uses HTTP, or if the
    /// underlying HTTP client fails to build.
    pub fn new(
        base: Url,
        username: String,
        password: SecretString,
        timeout: Duration,
        connect_timeout: Duration,
        insecure_http: bool,
    ) -> Result<Self> {
        if base.scheme() != "https" && !insecure_http {
            return Err(Error::Config(ConfigError::InvalidField {
                field: "tracker.url",
                message: "only https URLs are accepted without --insecure"
                    .to_string(),
            }));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(concat!("ticketing/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(30));

        if !insecure_http {
            builder = builder.https_only(true);
        }

        let http = builder
            .build()
            .map_err(|err| TrackerError::Client { source: err })?;

        Ok(Self {
            http,
            base: with_trailing_slash(base),
            username,
            password,
        })
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, TrackerError> {
        Ok(self.base.join(API_PREFIX)?.join(path)?)
    }

    async fn execute(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> std::result::Result<(StatusCode, Vec<u8>), TrackerError> {
        let correlation_id = Uuid::now_v7().to_string();
        let started = Instant::now();
        let response = request
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header(CORRELATION_HEADER, &correlation_id)
            .send()
            .await
            .map_err(|err| transport_error(operation, err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(operation, err))?;
        debug!(
            operation,
            %correlation_id,
            %status,
            latency_ms = started.elapsed().as_millis(),
            "tracker call completed"
        );
        if !status.is_success() && status != StatusCode::BAD_REQUEST {
            warn!(
                operation,
                %correlation_id,
                %status,
                body = %body_preview(&body),
                "tracker returned an error status"
            );
        }
        Ok((status, body.to_vec()))
    }
}

impl TicketTracker for JiraClient {
    async fn search(&self, query: &str) -> std::result::Result<SearchResult, TrackerError> {
        let url = self.endpoint("search")?;
        let request = self
            .http
            .get(url)
            .query(&[("jql", query), ("maxResults", "1"), ("fields", "key")]);
        let (status, body) = self.execute("search", request).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let raw: RawSearch = decode("search", &body)?;
        Ok(raw.into())
    }

    async fn create(&self, fields: &FieldSet) -> std::result::Result<CreateResponse, TrackerError> {
        let url = self.endpoint("issue")?;
        let request = self.http.post(url).json(&CreateRequest { fields });
        let (status, body) = self.execute("create", request).await?;
        if status.is_success() {
            let raw: RawCreate = decode("create", &body)?;
            return Ok(raw.into());
        }
        if status == StatusCode::BAD_REQUEST {
            if let Ok(raw) = serde_json::from_slice::<RawCreate>(&body) {
                let response = CreateResponse::from(raw);
                if !response.errors.is_empty() {
                    return Ok(response);
                }
            }
        }
        Err(status_error(status, &body))
    }

    async fn comment(&self, key: &str, body: &str) -> std::result::Result<(), TrackerError> {
        let url = self.endpoint(&format!("issue/{key}/comment"))?;
        let request = self.http.post(url).json(&CommentRequest { body });
        let (status, response) = self.execute("comment", request).await?;
        if !status.is_success() {
            return Err(status_error(status, &response));
        }
        Ok(())
    }

    fn browse_url(&self, key: &str) -> Option<String> {
        self.base
            .join(&format!("browse/{key}"))
            .ok()
            .map(String::from)
    }
}

fn with_trailing_slash(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

fn transport_error(operation: &'static str, err: reqwest::Error) -> TrackerError {
    if err.is_timeout() {
        TrackerError::Timeout { operation }
    } else {
        TrackerError::from(err)
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> TrackerError {
    TrackerError::HttpStatus {
        status,
        body: body_preview(body),
    }
}

fn decode<T>(operation: &'static str, body: &[u8]) -> std::result::Result<T, TrackerError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|err| TrackerError::Json {
        message: format!(
            "error decoding {operation} response: {err}; body preview: {}",
            body_preview(body)
        ),
    })
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::with_trailing_slash;

    #[test]
    fn base_path_gains_trailing_slash() {
        let parse = |raw: &str| match Url::parse(raw) {
            Ok(url) => url,
            Err(err) => panic!("bad url {raw}: {err}"),
        };
        assert_eq!(
            with_trailing_slash(parse("https://jira.example.com/jira")).as_str(),
            "https://jira.example.com/jira/"
        );
        assert_eq!(
            with_trailing_slash(parse("https://jira.example.com")).as_str(),
            "https://jira.example.com/"
        );
    }
}
