use std::sync::Arc;
use std::time::Duration;

use graphql_client::Response as GraphQLResponse;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder};
use tokio::sync::Semaphore;
use url::Url;

use crate::auth::Credentials;
use crate::error::{QuirrusError, Result};

pub const DEFAULT_API_URL: &str = "https://api.cirrus-ci.com/graphql";

const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Transport-level settings of the Cirrus client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub request_timeout: Option<Duration>,
    pub connection_retries: u32,
    pub max_concurrent_requests: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Some(Duration::from_secs(60)),
            connection_retries: 5,
            max_concurrent_requests: 50,
        }
    }
}

pub struct CirrusClient {
    client: Client,
    graphql_url: Url,
    credentials: Option<Credentials>,
    retries: u32,
    retry_base_delay: Duration,
    semaphore: Arc<Semaphore>,
}

impl CirrusClient {
    pub fn new(settings: &ClientSettings, credentials: Option<Credentials>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!("quirrus/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| QuirrusError::Config(format!("Failed to create HTTP client: {e}")))?;

        let graphql_url = Url::parse(&settings.api_url)
            .map_err(|e| QuirrusError::Config(format!("Invalid API URL '{}': {e}", settings.api_url)))?;

        Ok(Self {
            client,
            graphql_url,
            credentials,
            retries: settings.connection_retries,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1))),
        })
    }

    /// Overrides the first backoff delay; later retries double it.
    #[must_use]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn graphql_url(&self) -> &Url {
        &self.graphql_url
    }

    pub(super) fn http(&self) -> &Client {
        &self.client
    }

    pub fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(credentials) => credentials.apply(request),
            None => request,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_RETRY_DELAY)
    }

    /// Sends a request built by `make_request`, retrying connection failures,
    /// timeouts, rate limiting and server errors with exponential backoff.
    pub(super) async fn send_with_retry<F>(
        &self,
        description: &str,
        make_request: F,
    ) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| QuirrusError::Config("Request limiter was closed".to_string()))?;

        let mut attempt = 0;
        loop {
            let request = self.auth_request(make_request());

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    if attempt >= self.retries {
                        return Err(e.into());
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        "Network error during {description} ({e}), retrying in {delay:?} ({}/{})...",
                        attempt + 1,
                        self.retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                if attempt >= self.retries {
                    return Err(QuirrusError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.retries,
                    });
                }
                let delay = self.backoff(attempt);
                warn!(
                    "Cirrus API error during {description} (status {status}). Waiting {delay:?} before retry {}/{}...",
                    attempt + 1,
                    self.retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(QuirrusError::ApiError {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }
    }

    /// Executes a GraphQL request and returns its `data`. GraphQL-level errors
    /// in a successful HTTP response are surfaced without retrying.
    pub async fn execute_graphql_request<T>(
        &self,
        request_body: &(impl serde::Serialize + Sync),
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let query_type = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or("query")
            .to_string();
        debug!("Sending GraphQL request {query_type} to {}", self.graphql_url);

        let response = self
            .send_with_retry(&query_type, || {
                self.client.post(self.graphql_url.clone()).json(request_body)
            })
            .await?;

        let response_body: GraphQLResponse<T> = response.json().await?;

        if let Some(errors) = response_body.errors.filter(|errors| !errors.is_empty()) {
            return Err(QuirrusError::GraphQLError {
                query_type,
                errors: errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        response_body.data.ok_or(QuirrusError::NoResponseData)
    }
}
