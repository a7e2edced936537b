use log::info;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use reqwest::Url;
use serde_json::Map;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::relay_types::HeaterStatus;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("error parsing URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("error talking to API")]
    Transport(#[source] reqwest::Error),

    #[error("received unexpected http response code {0}")]
    Status(StatusCode),

    #[error("error reading response body")]
    Body(#[source] reqwest::Error),

    #[error("error decoding json: {message}; body: {body}")]
    Decode { message: String, body: String },
}

impl FetchError {
    fn invalid_url<S1: Into<String>, S2: Into<String>>(url: S1, message: S2) -> Self {
        FetchError::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    fn decode<S: Into<String>>(message: S, body: &[u8]) -> Self {
        FetchError::Decode {
            message: message.into(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// Where a watcher gets the desired state of its relay from.
pub trait StatusSource: Send {
    fn relay_id(&self) -> &str;

    /// Fetches the current status. With `observed_version` set, the request
    /// should only complete once a newer version exists.
    fn fetch(&mut self, observed_version: Option<i64>) -> Result<HeaterStatus, FetchError>;
}

pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub struct HttpStatusSource {
    client: Client,
    base_url: String,
    username: String,
    relay_id: String,
}

impl HttpStatusSource {
    pub fn new<S1: Into<String>, S2: Into<String>, S3: Into<String>>(
        client: Client,
        base_url: S1,
        username: S2,
        relay_id: S3,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            relay_id: relay_id.into(),
        }
    }
}

impl StatusSource for HttpStatusSource {
    fn relay_id(&self) -> &str {
        &self.relay_id
    }

    fn fetch(&mut self, observed_version: Option<i64>) -> Result<HeaterStatus, FetchError> {
        let url = resource_url(
            &self.base_url,
            &self.username,
            &self.relay_id,
            observed_version,
        )?;

        info!("GET {}", url);
        let response = self.client.get(url).send().map_err(FetchError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().map_err(FetchError::Body)?;
        decode_status(&body)
    }
}

/// `<base>/users/<username>/heaters/<relay_id>`, plus the long-poll query once
/// a version has been observed.
pub fn resource_url(
    base_url: &str,
    username: &str,
    relay_id: &str,
    observed_version: Option<i64>,
) -> Result<Url, FetchError> {
    let mut url =
        Url::parse(base_url).map_err(|e| FetchError::invalid_url(base_url, e.to_string()))?;

    url.path_segments_mut()
        .map_err(|_| FetchError::invalid_url(base_url, "URL cannot carry a path"))?
        .pop_if_empty()
        .extend(&["users", username, "heaters", relay_id]);

    if let Some(version) = observed_version {
        url.query_pairs_mut()
            .append_pair("longpoll", "true")
            .append_pair("version", &version.to_string());
    }

    Ok(url)
}

/// Decodes `{"Value": ..., "Version": ...}`. Field names match exactly first,
/// then ignoring ASCII case.
pub fn decode_status(body: &[u8]) -> Result<HeaterStatus, FetchError> {
    let json: Value =
        serde_json::from_slice(body).map_err(|e| FetchError::decode(e.to_string(), body))?;

    let fields = match json.as_object() {
        Some(fields) => fields,
        None => return Err(FetchError::decode("expected a JSON object", body)),
    };

    let value = match get_field(fields, "Value", body)?.as_str() {
        Some(value) => value,
        None => return Err(FetchError::decode("field 'Value' must be a string", body)),
    };

    let version = match get_field(fields, "Version", body)?.as_i64() {
        Some(version) => version,
        None => return Err(FetchError::decode("field 'Version' must be an integer", body)),
    };

    Ok(HeaterStatus::new(value, version))
}

fn get_field<'a>(
    fields: &'a Map<String, Value>,
    field: &str,
    body: &[u8],
) -> Result<&'a Value, FetchError> {
    let value = fields.get(field).or_else(|| {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    });
    match value {
        Some(value) => Ok(value),
        None => Err(FetchError::decode(
            format!("field '{}' is missing", field),
            body,
        )),
    }
}
