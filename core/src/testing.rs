//! In-memory radar used by the unit tests.

use crate::error::TransportError;
use crate::radar::transport::{FileUpload, HttpResponse, Transport};
use crate::radar::ApresClient;
use crate::survey::{Notifier, SurveyEvent};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const URL_PREFIX: &str = "http://radar.test/api/";

/// How the radar answers the next burst start.
#[derive(Debug, Clone)]
pub enum BurstReply {
    Started,
    Busy(String),
    Rejected(u16),
    Unauthorized,
    ConnectionRefused,
}

/// A scripted transport outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(HttpResponse),
    Fail(TransportError),
}

#[derive(Debug, Clone)]
struct DeviceConfig {
    rf: Vec<f64>,
    af: Vec<f64>,
    sub_bursts: u32,
    averages: u32,
    tx: [u8; 8],
    rx: [u8; 8],
    user_data: String,
}

impl DeviceConfig {
    fn to_json(&self) -> String {
        json!({
            "nAttenuators": self.rf.len(),
            "nSubBursts": self.sub_bursts,
            "nAverages": self.averages,
            "rfAttn": self.rf,
            "afGain": self.af,
            "userData": self.user_data,
            "txAntenna": self.tx,
            "rxAntenna": self.rx,
        })
        .to_string()
    }

    fn resize(&mut self, count: usize) {
        let rf_fill = self.rf.last().copied().unwrap_or(0.0);
        let af_fill = self.af.last().copied().unwrap_or(-14.0);
        self.rf.resize(count, rf_fill);
        self.af.resize(count, af_fill);
    }

    fn apply(&mut self, name: &str, value: &str) {
        let parse_flags = |value: &str| -> Option<[u8; 8]> {
            let flags: Vec<u8> = value.split(',').filter_map(|v| v.trim().parse().ok()).collect();
            flags.try_into().ok()
        };
        match name {
            "nSubBursts" => self.sub_bursts = value.parse().unwrap_or(self.sub_bursts),
            "nAverages" => self.averages = value.parse().unwrap_or(self.averages),
            "userData" => self.user_data = value.to_string(),
            "txAntenna" => self.tx = parse_flags(value).unwrap_or(self.tx),
            "rxAntenna" => self.rx = parse_flags(value).unwrap_or(self.rx),
            _ => {
                let (values, index) = if let Some(index) = name.strip_prefix("rfAttn") {
                    (&mut self.rf, index)
                } else if let Some(index) = name.strip_prefix("afGain") {
                    (&mut self.af, index)
                } else {
                    return;
                };
                if let (Ok(index), Ok(value)) = (index.parse::<usize>(), value.parse::<f64>()) {
                    if let Some(slot) = values.get_mut(index.wrapping_sub(1)) {
                        *slot = value;
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct State {
    config: DeviceConfig,
    config_override: Option<String>,
    ignored: HashSet<String>,
    bursts: VecDeque<BurstReply>,
    results: VecDeque<Reply>,
    started: Option<String>,
    failures: VecDeque<(String, TransportError)>,
    listing: (u16, String),
    download: Vec<u8>,
    upload_status: u16,
    uploads: Vec<FileUpload>,
    log: Vec<(String, String, Vec<(String, String)>)>,
}

/// Cloneable handle to a fake radar; clones share state.
#[derive(Debug, Clone)]
pub struct FakeRadar {
    state: Arc<Mutex<State>>,
}

impl FakeRadar {
    pub const KEY: &'static str = "18052021";
    pub const SYSTEM_CONFIG: &'static str = "[radar]\nnAttenuators=1\n";

    pub fn new() -> Self {
        let state = State {
            config: DeviceConfig {
                rf: vec![25.0],
                af: vec![-14.0],
                sub_bursts: 5,
                averages: 0,
                tx: [1, 1, 0, 0, 0, 0, 0, 0],
                rx: [1, 0, 0, 0, 0, 0, 0, 0],
                user_data: String::new(),
            },
            config_override: None,
            ignored: HashSet::new(),
            bursts: VecDeque::new(),
            results: VecDeque::new(),
            started: None,
            failures: VecDeque::new(),
            listing: (200, String::new()),
            download: Vec::new(),
            upload_status: 201,
            uploads: Vec::new(),
            log: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A client for this radar with the API key already assigned.
    pub fn client(radar: &FakeRadar) -> ApresClient<FakeRadar> {
        let mut client = ApresClient::with_transport("radar.test", radar.clone());
        client
            .configure(Self::KEY)
            .expect("fake key is not empty");
        client
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_config_body(&self, body: &str) {
        self.state().config_override = Some(body.to_string());
    }

    pub fn set_attenuators(&self, rf: &[f64], af: &[f64]) {
        let mut state = self.state();
        state.config.rf = rf.to_vec();
        state.config.af = af.to_vec();
    }

    pub fn set_sub_bursts(&self, count: u32) {
        self.state().config.sub_bursts = count;
    }

    /// Accept but silently drop posts of `field`.
    pub fn ignore_field(&self, field: &str) {
        self.state().ignored.insert(field.to_string());
    }

    pub fn script_bursts(&self, replies: Vec<BurstReply>) {
        self.state().bursts = replies.into();
    }

    /// Replies to `radar/results`; the last one repeats once the script runs out.
    pub fn script_results(&self, replies: Vec<Reply>) {
        self.state().results = replies.into();
    }

    /// The next request to `route` fails at the transport level.
    pub fn fail_next(&self, route: &str, err: TransportError) {
        self.state().failures.push_back((route.to_string(), err));
    }

    pub fn set_listing(&self, status: u16, body: &str) {
        self.state().listing = (status, body.to_string());
    }

    pub fn set_download(&self, body: &[u8]) {
        self.state().download = body.to_vec();
    }

    pub fn set_upload_status(&self, status: u16) {
        self.state().upload_status = status;
    }

    pub fn json(body: &str) -> Reply {
        Reply::Respond(json_response(200, body.to_string()))
    }

    pub fn busy_results() -> Reply {
        Self::json(r#"{"status":"busy"}"#)
    }

    pub fn full_results(filename: &str) -> Reply {
        Reply::Respond(json_response(200, full_results_body(filename)))
    }

    pub fn unreachable() -> Reply {
        Reply::Fail(TransportError::Connect("connection refused".into()))
    }

    /// `METHOD route` of every request received.
    pub fn request_log(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .map(|(method, route, _)| format!("{} {}", method, route))
            .collect()
    }

    pub fn count(&self, route: &str) -> usize {
        self.state().log.iter().filter(|(_, r, _)| r == route).count()
    }

    pub fn last_form(&self, route: &str) -> Option<Vec<(String, String)>> {
        self.last_fields("POST", route)
    }

    pub fn last_query(&self, route: &str) -> Option<Vec<(String, String)>> {
        self.last_fields("GET", route)
    }

    fn last_fields(&self, method: &str, route: &str) -> Option<Vec<(String, String)>> {
        self.state()
            .log
            .iter()
            .rev()
            .find(|(m, r, _)| m == method && r == route)
            .map(|(_, _, fields)| fields.clone())
    }

    pub fn last_upload(&self) -> Option<FileUpload> {
        self.state().uploads.last().cloned()
    }

    fn take_failure(state: &mut State, route: &str) -> Option<TransportError> {
        let index = state.failures.iter().position(|(r, _)| r == route)?;
        state.failures.remove(index).map(|(_, err)| err)
    }

    fn route(url: &str) -> String {
        url.strip_prefix(URL_PREFIX).unwrap_or(url).to_string()
    }
}

impl Default for FakeRadar {
    fn default() -> Self {
        Self::new()
    }
}

fn json_response(status: u16, body: String) -> HttpResponse {
    HttpResponse {
        status,
        content_type: Some("application/json".into()),
        body: body.into_bytes(),
    }
}

fn envelope(code: u16, message: &str) -> HttpResponse {
    json_response(
        code,
        json!({ "errorCode": code, "errorMessage": message }).to_string(),
    )
}

fn full_results_body(filename: &str) -> String {
    json!({
        "status": "finished",
        "type": "burst",
        "nAttenuators": 1,
        "startFrequency": 2e8,
        "stopFrequency": 4e8,
        "period": 1.0,
        "filename": filename,
    })
    .to_string()
}

fn has_key(form: &[(String, String)]) -> bool {
    form.iter()
        .any(|(name, value)| name == "apikey" && value == FakeRadar::KEY)
}

impl Transport for FakeRadar {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        let route = Self::route(url);
        let mut state = self.state();
        state.log.push(("GET".into(), route.clone(), query.to_vec()));
        if let Some(err) = Self::take_failure(&mut state, &route) {
            return Err(err);
        }
        let response = match route.as_str() {
            "radar/config" => {
                let body = state
                    .config_override
                    .clone()
                    .unwrap_or_else(|| state.config.to_json());
                json_response(200, body)
            }
            "radar/results" => {
                let reply = if state.results.len() > 1 {
                    state.results.pop_front()
                } else {
                    state.results.front().cloned()
                };
                match reply {
                    Some(Reply::Respond(response)) => response,
                    Some(Reply::Fail(err)) => return Err(err),
                    None => match state.started.take() {
                        Some(filename) => json_response(200, full_results_body(&filename)),
                        None => json_response(200, r#"{"status":"idle"}"#.into()),
                    },
                }
            }
            "data" => {
                let (status, body) = state.listing.clone();
                json_response(status, body)
            }
            "data/download" => HttpResponse {
                status: 200,
                content_type: Some("application/octet-stream".into()),
                body: state.download.clone(),
            },
            "system/housekeeping/status" => json_response(
                200,
                json!({
                    "batteryVoltage": 12.4,
                    "timeGPS": "",
                    "timeVAB": "2024-01-05 10:00:00",
                    "latitude": -75.1,
                    "longitude": -26.7,
                })
                .to_string(),
            ),
            "system/housekeeping/config" => HttpResponse {
                status: 200,
                content_type: Some("text/plain".into()),
                body: FakeRadar::SYSTEM_CONFIG.as_bytes().to_vec(),
            },
            _ => envelope(404, "route not found"),
        };
        Ok(response)
    }

    fn post(&self, url: &str, form: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        let route = Self::route(url);
        let mut state = self.state();
        state.log.push(("POST".into(), route.clone(), form.to_vec()));
        if let Some(err) = Self::take_failure(&mut state, &route) {
            return Err(err);
        }
        if route == "radar/burst" || route == "radar/trial-burst" {
            match state.bursts.pop_front().unwrap_or(BurstReply::Started) {
                BurstReply::Started => {}
                BurstReply::Busy(message) => return Ok(envelope(503, &message)),
                BurstReply::Rejected(status) => {
                    return Ok(HttpResponse {
                        status,
                        content_type: Some("text/html".into()),
                        body: b"<html></html>".to_vec(),
                    })
                }
                BurstReply::Unauthorized => return Ok(envelope(401, "invalid API key")),
                BurstReply::ConnectionRefused => {
                    return Err(TransportError::Connect("connection refused".into()))
                }
            }
        }
        if !has_key(form) {
            return Ok(envelope(401, "invalid API key"));
        }
        let response = match route.as_str() {
            "radar/config" => {
                if let Some((_, count)) = form.iter().find(|(name, _)| name == "nAttenuators") {
                    if !state.ignored.contains("nAttenuators") {
                        if let Ok(count) = count.parse::<usize>() {
                            state.config.resize(count);
                        }
                    }
                }
                for (name, value) in form {
                    if name != "nAttenuators" && !state.ignored.contains(name) {
                        state.config.apply(name, value);
                    }
                }
                json_response(200, state.config.to_json())
            }
            "radar/burst" | "radar/trial-burst" => {
                let filename = form
                    .iter()
                    .find(|(name, _)| name == "filename")
                    .map(|(_, value)| value.clone())
                    .unwrap_or_else(|| "burst.dat".into());
                state.started = Some(filename);
                HttpResponse {
                    status: 303,
                    content_type: None,
                    body: Vec::new(),
                }
            }
            "system/reset" => json_response(
                202,
                json!({ "message": "Resetting", "time": "2024-01-05 10:00:00" }).to_string(),
            ),
            _ => envelope(404, "route not found"),
        };
        Ok(response)
    }

    fn post_file(
        &self,
        url: &str,
        form: &[(String, String)],
        upload: FileUpload,
    ) -> Result<HttpResponse, TransportError> {
        let route = Self::route(url);
        let mut state = self.state();
        state.log.push(("POST".into(), route, form.to_vec()));
        if !has_key(form) {
            return Ok(envelope(401, "invalid API key"));
        }
        state.uploads.push(upload);
        Ok(HttpResponse {
            status: state.upload_status,
            content_type: Some("text/plain".into()),
            body: Vec::new(),
        })
    }
}

/// Notifier that keeps every announced event.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<SurveyEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<SurveyEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn announce(&self, event: &SurveyEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
