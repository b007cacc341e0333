use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use directories::BaseDirs;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ClimateError;

pub const URL_ENV: &str = "CDSAPI_URL";
pub const KEY_ENV: &str = "CDSAPI_KEY";
pub const RC_FILE: &str = ".cdsapirc";

/// Parameter set of one retrieval, as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalParams {
    pub format: String,
    pub temporal_resolution: String,
    pub experiment: String,
    pub level: String,
    pub variable: String,
    pub model: String,
}

/// Downloads one archive for `dataset` and `params` into `destination`.
pub trait RetrievalClient: Send + Sync {
    fn retrieve(
        &self,
        dataset: &str,
        params: &RetrievalParams,
        destination: &Path,
    ) -> Result<u64, ClimateError>;
}

impl<T: RetrievalClient + ?Sized> RetrievalClient for &T {
    fn retrieve(
        &self,
        dataset: &str,
        params: &RetrievalParams,
        destination: &Path,
    ) -> Result<u64, ClimateError> {
        (**self).retrieve(dataset, params, destination)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdsCredentials {
    pub url: String,
    pub key: String,
}

impl CdsCredentials {
    pub fn from_env() -> Result<Self, ClimateError> {
        Self::resolve(|name| std::env::var(name).ok(), default_rc_path().as_deref())
    }

    /// Environment first, then the rc file. Both url and key must come from
    /// the same source.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        rc_path: Option<&Path>,
    ) -> Result<Self, ClimateError> {
        let url = lookup(URL_ENV).filter(|value| !value.trim().is_empty());
        let key = lookup(KEY_ENV).filter(|value| !value.trim().is_empty());
        if let (Some(url), Some(key)) = (url, key) {
            return Self::validated(url, key);
        }

        let Some(rc_path) = rc_path.filter(|path| path.exists()) else {
            return Err(ClimateError::MissingCredentials);
        };
        let content = fs::read_to_string(rc_path)
            .map_err(|err| ClimateError::InvalidCredentials(format!("{}: {err}", rc_path.display())))?;
        Self::parse_rc(&content)
    }

    /// Parses the `key: value` lines of a `.cdsapirc` file.
    pub fn parse_rc(content: &str) -> Result<Self, ClimateError> {
        let mut url = None;
        let mut key = None;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            match name.trim() {
                "url" => url = Some(value.trim().to_string()),
                "key" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }
        match (url, key) {
            (Some(url), Some(key)) => Self::validated(url, key),
            _ => Err(ClimateError::MissingCredentials),
        }
    }

    fn validated(url: String, key: String) -> Result<Self, ClimateError> {
        let credentials = Self {
            url: url.trim().trim_end_matches('/').to_string(),
            key: key.trim().to_string(),
        };
        credentials.basic_auth()?;
        Ok(credentials)
    }

    /// Splits the `<uid>:<api key>` pair.
    pub fn basic_auth(&self) -> Result<(&str, &str), ClimateError> {
        match self.key.split_once(':') {
            Some((uid, secret)) if !uid.is_empty() && !secret.is_empty() => Ok((uid, secret)),
            _ => Err(ClimateError::InvalidCredentials(
                "key must have the form <uid>:<api key>".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskReply {
    state: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    error: Option<TaskError>,
}

#[derive(Debug, Deserialize)]
struct TaskError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl TaskError {
    fn describe(&self) -> String {
        match (&self.message, &self.reason) {
            (Some(message), Some(reason)) => format!("{message}: {reason}"),
            (Some(message), None) => message.clone(),
            (None, Some(reason)) => reason.clone(),
            (None, None) => "no message".to_string(),
        }
    }
}

/// Client for the Climate Data Store task API.
#[derive(Clone)]
pub struct CdsHttpClient {
    client: Client,
    credentials: CdsCredentials,
    poll_interval: Duration,
}

impl CdsHttpClient {
    pub fn new(credentials: CdsCredentials, poll_interval: Duration) -> Result<Self, ClimateError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("climate-evolution/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ClimateError::CdsHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|err| ClimateError::CdsHttp(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
            poll_interval,
        })
    }

    fn resource_url(&self, dataset: &str) -> String {
        format!("{}/resources/{dataset}", self.credentials.url)
    }

    fn task_url(&self, request_id: &str) -> String {
        format!("{}/tasks/{request_id}", self.credentials.url)
    }

    fn download_url(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.credentials.url, location.trim_start_matches('/'))
        }
    }

    fn handle_status(response: Response) -> Result<Response, ClimateError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "CDS request failed".to_string());
        Err(ClimateError::CdsStatus { status, message })
    }

    fn parse_reply(response: Response) -> Result<TaskReply, ClimateError> {
        Self::handle_status(response)?
            .json::<TaskReply>()
            .map_err(|err| ClimateError::CdsHttp(err.to_string()))
    }

    fn submit(&self, dataset: &str, params: &RetrievalParams) -> Result<TaskReply, ClimateError> {
        let (uid, secret) = self.credentials.basic_auth()?;
        let response = self
            .client
            .post(self.resource_url(dataset))
            .basic_auth(uid, Some(secret))
            .json(params)
            .send()
            .map_err(|err| ClimateError::CdsHttp(err.to_string()))?;
        Self::parse_reply(response)
    }

    fn poll(&self, request_id: &str) -> Result<TaskReply, ClimateError> {
        let (uid, secret) = self.credentials.basic_auth()?;
        let response = self
            .client
            .get(self.task_url(request_id))
            .basic_auth(uid, Some(secret))
            .send()
            .map_err(|err| ClimateError::CdsHttp(err.to_string()))?;
        Self::parse_reply(response)
    }

    fn download(&self, location: &str, destination: &Path) -> Result<u64, ClimateError> {
        let mut response = self
            .client
            .get(self.download_url(location))
            .send()
            .map_err(|err| ClimateError::CdsHttp(err.to_string()))
            .and_then(Self::handle_status)?;
        let mut file =
            File::create(destination).map_err(|err| ClimateError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file).map_err(|err| ClimateError::CdsHttp(err.to_string()))
    }
}

impl RetrievalClient for CdsHttpClient {
    fn retrieve(
        &self,
        dataset: &str,
        params: &RetrievalParams,
        destination: &Path,
    ) -> Result<u64, ClimateError> {
        let mut reply = self.submit(dataset, params)?;
        let request_id = reply.request_id.clone().unwrap_or_default();
        info!(
            dataset,
            experiment = %params.experiment,
            variable = %params.variable,
            request_id = %request_id,
            "submitted retrieval"
        );

        loop {
            match reply.state.as_str() {
                "completed" => {
                    let location = reply.location.as_deref().ok_or_else(|| ClimateError::CdsTask {
                        request_id: request_id.clone(),
                        message: "completed task has no result location".to_string(),
                    })?;
                    return self.download(location, destination);
                }
                "queued" | "running" => {
                    debug!(request_id = %request_id, state = %reply.state, "waiting for task");
                    if request_id.is_empty() {
                        return Err(ClimateError::CdsTask {
                            request_id,
                            message: "service returned no request id".to_string(),
                        });
                    }
                    thread::sleep(self.poll_interval);
                    reply = self.poll(&request_id)?;
                }
                "failed" => {
                    let message = reply
                        .error
                        .as_ref()
                        .map(TaskError::describe)
                        .unwrap_or_else(|| "no message".to_string());
                    return Err(ClimateError::CdsTask { request_id, message });
                }
                other => {
                    return Err(ClimateError::CdsTask {
                        request_id,
                        message: format!("unexpected task state `{other}`"),
                    });
                }
            }
        }
    }
}

/// Default location of the rc file, if a home directory is known.
pub fn default_rc_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(RC_FILE))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_rc_file() {
        let content = "url: https://cds.climate.copernicus.eu/api/v2/\nkey: 1234:abcd-ef\nverify: 0\n";
        let credentials = CdsCredentials::parse_rc(content).unwrap();
        assert_eq!(credentials.url, "https://cds.climate.copernicus.eu/api/v2");
        assert_eq!(credentials.basic_auth().unwrap(), ("1234", "abcd-ef"));
    }

    #[test]
    fn env_wins_over_rc_file() {
        let temp = tempfile::tempdir().unwrap();
        let rc = temp.path().join(RC_FILE);
        fs::write(&rc, "url: https://rc.example\nkey: 1:rc\n").unwrap();

        let credentials = CdsCredentials::resolve(
            |name| match name {
                URL_ENV => Some("https://env.example".to_string()),
                KEY_ENV => Some("2:env".to_string()),
                _ => None,
            },
            Some(&rc),
        )
        .unwrap();
        assert_eq!(credentials.url, "https://env.example");

        let credentials = CdsCredentials::resolve(|_| None, Some(&rc)).unwrap();
        assert_eq!(credentials.url, "https://rc.example");
    }

    #[test]
    fn missing_and_malformed_credentials() {
        let err = CdsCredentials::resolve(|_| None, None).unwrap_err();
        assert_matches!(err, ClimateError::MissingCredentials);

        let err = CdsCredentials::parse_rc("url: https://x\nkey: nocolon\n").unwrap_err();
        assert_matches!(err, ClimateError::InvalidCredentials(_));
    }

    #[test]
    fn download_url_handles_relative_locations() {
        let credentials = CdsCredentials {
            url: "https://cds.example/api/v2".to_string(),
            key: "1:k".to_string(),
        };
        let client = CdsHttpClient::new(credentials, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.download_url("https://download.example/a.zip"),
            "https://download.example/a.zip"
        );
        assert_eq!(
            client.download_url("/cache/a.zip"),
            "https://cds.example/api/v2/cache/a.zip"
        );
    }
}
