use crate::error::{ApresError, ApresResult};
use crate::radar::burst::BurstKind;
use crate::radar::config::RadarConfig;
use crate::radar::transport::{FileUpload, HttpResponse, HttpTransport, Transport};
use log::debug;
use serde::Deserialize;
use std::time::Duration;

/// Default root of a radar on its own access point.
pub const DEFAULT_ROOT: &str = "http://192.168.1.1";

/// Tunables of the protocol client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Added to the computed acquisition duration when waiting for results.
    pub base_results_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_results_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON error envelope returned by the radar.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(rename = "errorCode")]
    pub code: Option<u16>,
    #[serde(rename = "errorMessage")]
    pub message: Option<String>,
}

impl ErrorEnvelope {
    pub(crate) fn parse(response: &HttpResponse) -> Option<Self> {
        if !response.is_json() {
            return None;
        }
        let envelope: Self = serde_json::from_slice(&response.body).ok()?;
        if envelope.code.is_none() && envelope.message.is_none() {
            return None;
        }
        Some(envelope)
    }
}

/// Owns the HTTP session to one radar.
///
/// The device is the source of truth: the cached [`RadarConfig`] is refreshed
/// before every mutating operation and never trusted across a round trip.
pub struct ApresClient<T: Transport = HttpTransport> {
    pub(crate) root: String,
    pub(crate) api_key: Option<String>,
    pub(crate) transport: T,
    pub(crate) settings: ClientSettings,
    pub(crate) config: Option<RadarConfig>,
    pub(crate) outstanding: Option<BurstKind>,
    request_count: u64,
}

impl ApresClient<HttpTransport> {
    pub fn connect(root: &str) -> ApresResult<Self> {
        Ok(Self::with_transport(root, HttpTransport::new()?))
    }
}

impl<T: Transport> ApresClient<T> {
    pub fn with_transport(root: &str, transport: T) -> Self {
        Self {
            root: normalize_root(root),
            api_key: None,
            transport,
            settings: ClientSettings::default(),
            config: None,
            outstanding: None,
            request_count: 0,
        }
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Assigns the API key carried by every POST.
    pub fn configure(&mut self, key: &str) -> ApresResult<()> {
        if key.is_empty() {
            return Err(ApresError::InvalidCredential);
        }
        self.api_key = Some(key.to_string());
        Ok(())
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Last configuration read from the device, if any.
    pub fn cached_config(&self) -> Option<&RadarConfig> {
        self.config.as_ref()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub(crate) fn url(&self, route: &str) -> String {
        format!("{}/api/{}", self.root, route)
    }

    /// GET without envelope validation.
    pub(crate) fn get_raw(
        &mut self,
        route: &str,
        query: &[(String, String)],
    ) -> ApresResult<HttpResponse> {
        self.request_count += 1;
        let url = self.url(route);
        debug!("GET #{} {} {:?}", self.request_count, url, query);
        let response = self.transport.get(&url, query)?;
        debug!("GET #{} -> {}", self.request_count, response.status);
        Ok(response)
    }

    pub(crate) fn get(&mut self, route: &str, query: &[(String, String)]) -> ApresResult<HttpResponse> {
        let response = self.get_raw(route, query)?;
        validate_response(&response)?;
        Ok(response)
    }

    /// POST without envelope validation; the API key is appended to the form.
    pub(crate) fn post_raw(
        &mut self,
        route: &str,
        form: Vec<(String, String)>,
    ) -> ApresResult<HttpResponse> {
        let form = self.with_key(form)?;
        self.request_count += 1;
        let url = self.url(route);
        debug!(
            "POST #{} {} fields {:?}",
            self.request_count,
            url,
            form.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>()
        );
        let response = self.transport.post(&url, &form)?;
        debug!("POST #{} -> {}", self.request_count, response.status);
        Ok(response)
    }

    pub(crate) fn post(&mut self, route: &str, form: Vec<(String, String)>) -> ApresResult<HttpResponse> {
        let response = self.post_raw(route, form)?;
        validate_response(&response)?;
        Ok(response)
    }

    pub(crate) fn post_file(
        &mut self,
        route: &str,
        upload: FileUpload,
    ) -> ApresResult<HttpResponse> {
        let form = self.with_key(Vec::new())?;
        self.request_count += 1;
        let url = self.url(route);
        debug!("POST #{} {} upload {}", self.request_count, url, upload.filename);
        let response = self.transport.post_file(&url, &form, upload)?;
        validate_response(&response)?;
        Ok(response)
    }

    fn with_key(&self, mut form: Vec<(String, String)>) -> ApresResult<Vec<(String, String)>> {
        let key = self.api_key.as_ref().ok_or(ApresError::InvalidCredential)?;
        if !form.iter().any(|(name, _)| name == "apikey") {
            form.push(("apikey".to_string(), key.clone()));
        }
        Ok(form)
    }
}

/// Maps the radar's `{errorCode, errorMessage}` envelope onto error kinds.
pub(crate) fn validate_response(response: &HttpResponse) -> ApresResult<()> {
    let Some(envelope) = ErrorEnvelope::parse(response) else {
        return Ok(());
    };
    let message = envelope.message.unwrap_or_default();
    match envelope.code {
        Some(401) => Err(ApresError::Unauthorized(message)),
        Some(404) => Err(ApresError::NotFound(message)),
        Some(500) => Err(ApresError::DeviceError(message)),
        Some(503) => Err(ApresError::RadarBusy(message)),
        _ => Ok(()),
    }
}

pub(crate) fn parse_json<D: serde::de::DeserializeOwned>(
    response: &HttpResponse,
    what: &str,
) -> ApresResult<D> {
    serde_json::from_slice(&response.body)
        .map_err(|e| ApresError::MalformedResponse(format!("{}: {}", what, e)))
}

/// Always `http://host[:port][/prefix]` with no trailing slash.
pub fn normalize_root(root: &str) -> String {
    let root = root.trim();
    let root = match root.find("http://") {
        Some(index) => root[index..].to_string(),
        None => format!("http://{}", root),
    };
    root.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRadar;

    #[test]
    fn root_is_normalized() {
        assert_eq!(normalize_root("192.168.1.1"), "http://192.168.1.1");
        assert_eq!(normalize_root("http://radar.localnet/"), "http://radar.localnet");
        assert_eq!(normalize_root("  xxhttp://radar.localnet//"), "http://radar.localnet");
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut client = ApresClient::with_transport("radar.test", FakeRadar::new());
        assert!(matches!(client.configure(""), Err(ApresError::InvalidCredential)));
        assert!(client.configure("18052021").is_ok());
    }

    #[test]
    fn post_without_key_fails_locally() {
        let radar = FakeRadar::new();
        let mut client = ApresClient::with_transport("radar.test", radar.clone());
        let err = client.post("system/reset", Vec::new()).unwrap_err();
        assert!(matches!(err, ApresError::InvalidCredential));
        assert_eq!(radar.request_log().len(), 0);
    }

    #[test]
    fn post_carries_api_key() {
        let radar = FakeRadar::new();
        let mut client = FakeRadar::client(&radar);
        client.post("system/reset", Vec::new()).unwrap();
        let posted = radar.last_form("system/reset").unwrap();
        assert!(posted.contains(&("apikey".to_string(), FakeRadar::KEY.to_string())));
    }

    #[test]
    fn envelope_codes_map_to_error_kinds() {
        let json = |code: u16| HttpResponse {
            status: code,
            content_type: Some("application/json".into()),
            body: format!(r#"{{"errorCode":{},"errorMessage":"m"}}"#, code).into_bytes(),
        };
        assert!(matches!(validate_response(&json(401)), Err(ApresError::Unauthorized(_))));
        assert!(matches!(validate_response(&json(404)), Err(ApresError::NotFound(_))));
        assert!(matches!(validate_response(&json(500)), Err(ApresError::DeviceError(_))));
        assert!(matches!(validate_response(&json(503)), Err(ApresError::RadarBusy(_))));
        assert!(validate_response(&json(418)).is_ok());
    }

    #[test]
    fn non_json_bodies_skip_envelope_checks() {
        let response = HttpResponse {
            status: 500,
            content_type: Some("text/plain".into()),
            body: br#"{"errorCode":500}"#.to_vec(),
        };
        assert!(validate_response(&response).is_ok());
    }
}
