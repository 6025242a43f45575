use crate::error::TransportError;
use reqwest::blocking::{multipart, Client};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use std::time::Duration;

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw response as seen by the protocol layer.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|value| value.starts_with("application/json"))
            .unwrap_or(false)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A file attached to a multipart POST.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub field: String,
    pub filename: String,
    pub content: Vec<u8>,
}

/// Blocking request/response seam between the protocol client and the network.
///
/// Implementations must not follow redirects: a burst start is acknowledged
/// with a bare 303.
pub trait Transport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, TransportError>;

    fn post(&self, url: &str, form: &[(String, String)]) -> Result<HttpResponse, TransportError>;

    fn post_file(
        &self,
        url: &str,
        form: &[(String, String)],
        upload: FileUpload,
    ) -> Result<HttpResponse, TransportError>;
}

/// `reqwest` blocking transport used against a real radar.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| TransportError::Other(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn finish(
        result: reqwest::Result<reqwest::blocking::Response>,
    ) -> Result<HttpResponse, TransportError> {
        let response = result.map_err(classify)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(classify)?.to_vec();
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    transport_error(err.is_connect(), err.is_timeout(), err.to_string())
}

/// A connect timeout reports both flags; it is still a connection failure.
fn transport_error(connect: bool, timeout: bool, message: String) -> TransportError {
    if connect {
        TransportError::Connect(message)
    } else if timeout {
        TransportError::Timeout(message)
    } else {
        TransportError::Other(message)
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        Self::finish(self.client.get(url).query(query).send())
    }

    fn post(&self, url: &str, form: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        Self::finish(self.client.post(url).form(form).send())
    }

    fn post_file(
        &self,
        url: &str,
        form: &[(String, String)],
        upload: FileUpload,
    ) -> Result<HttpResponse, TransportError> {
        let mut multipart = multipart::Form::new();
        for (name, value) in form {
            multipart = multipart.text(name.clone(), value.clone());
        }
        let part = multipart::Part::bytes(upload.content).file_name(upload.filename);
        multipart = multipart.part(upload.field, part);
        Self::finish(self.client.post(url).multipart(multipart).send())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_keeps_configured_timeout() {
        let transport = HttpTransport::with_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn connect_timeout_is_a_connection_failure() {
        assert!(matches!(
            transport_error(true, true, "connect timed out".into()),
            TransportError::Connect(_)
        ));
        assert!(matches!(
            transport_error(false, true, "read timed out".into()),
            TransportError::Timeout(_)
        ));
        assert!(matches!(
            transport_error(false, false, "reset".into()),
            TransportError::Other(_)
        ));
    }

    #[test]
    fn json_detection_tolerates_charset_suffix() {
        let response = HttpResponse {
            status: 200,
            content_type: Some("application/json; charset=utf-8".into()),
            body: b"{}".to_vec(),
        };
        assert!(response.is_json());
        assert!(!HttpResponse::default().is_json());
    }
}
