use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{GroupScope, ObjectId, ObjectKind, RemoteFile, RemoteObject, User};
use crate::error::MirrorError;
use crate::store::MirrorStore;

/// Session capability against the remote image repository.
///
/// Lookups are filtered by the active group; `fetch_file` blocks until the
/// file contents are written to `target`.
pub trait Repository: Send + Sync {
    fn current_user(&self) -> Result<User, MirrorError>;
    fn set_active_group(&self, scope: GroupScope);
    fn get_object(
        &self,
        kind: ObjectKind,
        id: ObjectId,
    ) -> Result<Option<RemoteObject>, MirrorError>;
    fn fetch_file(&self, file: &RemoteFile, target: &Utf8Path) -> Result<(), MirrorError>;
}

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new(timeout: Duration) -> Result<Self, MirrorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hrm-mirror/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MirrorError::TransferHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MirrorError::TransferHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn is_remote(source: &str) -> bool {
        source.starts_with("http://") || source.starts_with("https://")
    }

    /// Streams `url` into `target`, replacing it only once the body is complete.
    pub fn download(&self, url: &str, target: &Utf8Path) -> Result<(), MirrorError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        let mut response = Self::handle_status(url, response)?;
        MirrorStore::write_atomic(&mut response, target)
    }

    fn handle_status(
        url: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, MirrorError> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(MirrorError::TransferStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, MirrorError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying transfer");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying transfer");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(MirrorError::TransferHttp(err.to_string()));
                }
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
