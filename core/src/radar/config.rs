use crate::error::{ApresError, ApresResult};
use crate::radar::client::{parse_json, ApresClient, ErrorEnvelope};
use crate::radar::transport::Transport;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const MAX_ATTENUATORS: u8 = 4;
pub const MAX_USER_DATA_LEN: usize = 32;
const VALUE_TOLERANCE: f64 = 1e-6;

/// Eight antenna enable flags of a MIMO board; bit `i` is antenna `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AntennaMask(u8);

impl AntennaMask {
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Builds a mask from exactly eight 0/1 flags with at least one set.
    pub fn from_flags(flags: &[u8]) -> ApresResult<Self> {
        let mask = Self::decode(flags).map_err(ApresError::InvalidAntennaMask)?;
        if mask.is_empty() {
            return Err(ApresError::InvalidAntennaMask(
                "at least one antenna must be enabled".into(),
            ));
        }
        Ok(mask)
    }

    fn decode(flags: &[u8]) -> Result<Self, String> {
        if flags.len() != 8 {
            return Err(format!("expected 8 flags, got {}", flags.len()));
        }
        let mut bits = 0u8;
        for (index, flag) in flags.iter().enumerate() {
            match flag {
                0 => {}
                1 => bits |= 1 << index,
                other => return Err(format!("flag #{} is {}, expected 0 or 1", index + 1, other)),
            }
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn flags(self) -> [u8; 8] {
        let mut flags = [0u8; 8];
        for (index, flag) in flags.iter_mut().enumerate() {
            *flag = (self.0 >> index) & 1;
        }
        flags
    }

    /// Comma-separated form posted to the radar, e.g. `1,0,0,1,0,0,0,1`.
    pub fn to_wire(self) -> String {
        self.flags()
            .iter()
            .map(|flag| flag.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for AntennaMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.to_wire())
    }
}

/// Radar chirp configuration as reported by `radar/config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarConfig {
    pub attenuator_count: u8,
    pub sub_burst_count: u32,
    pub average_count: u32,
    pub rf_attenuation_db: Vec<f64>,
    pub af_gain_db: Vec<f64>,
    pub tx_antenna: AntennaMask,
    pub rx_antenna: AntennaMask,
    pub user_data: String,
}

impl RadarConfig {
    /// Number of active transmit/receive antenna pairs.
    pub fn active_channel_pairs(&self) -> u32 {
        self.tx_antenna.count() * self.rx_antenna.count()
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "nAttenuators")]
    attenuator_count: u8,
    #[serde(rename = "nSubBursts")]
    sub_burst_count: u32,
    #[serde(rename = "nAverages")]
    average_count: u32,
    #[serde(rename = "rfAttn")]
    rf_attenuation: Vec<f64>,
    #[serde(rename = "afGain")]
    af_gain: Vec<f64>,
    #[serde(rename = "userData")]
    user_data: String,
    #[serde(rename = "txAntenna")]
    tx_antenna: Vec<u8>,
    #[serde(rename = "rxAntenna")]
    rx_antenna: Vec<u8>,
}

impl TryFrom<RawConfig> for RadarConfig {
    type Error = ApresError;

    fn try_from(raw: RawConfig) -> ApresResult<Self> {
        let count = raw.attenuator_count as usize;
        if raw.rf_attenuation.len() != count || raw.af_gain.len() != count {
            return Err(ApresError::AttenuatorCountMismatch {
                count: raw.attenuator_count,
                rf: raw.rf_attenuation.len(),
                af: raw.af_gain.len(),
            });
        }
        let tx_antenna = AntennaMask::decode(&raw.tx_antenna)
            .map_err(|e| ApresError::MalformedResponse(format!("txAntenna: {}", e)))?;
        let rx_antenna = AntennaMask::decode(&raw.rx_antenna)
            .map_err(|e| ApresError::MalformedResponse(format!("rxAntenna: {}", e)))?;
        Ok(Self {
            attenuator_count: raw.attenuator_count,
            sub_burst_count: raw.sub_burst_count,
            average_count: raw.average_count,
            rf_attenuation_db: raw.rf_attenuation,
            af_gain_db: raw.af_gain,
            tx_antenna,
            rx_antenna,
            user_data: raw.user_data,
        })
    }
}

/// The two per-attenuator value families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttenuatorFamily {
    RfAttenuation,
    AfGain,
}

impl AttenuatorFamily {
    pub fn key_prefix(self) -> &'static str {
        match self {
            AttenuatorFamily::RfAttenuation => "rfAttn",
            AttenuatorFamily::AfGain => "afGain",
        }
    }

    fn current(self, config: &RadarConfig) -> &[f64] {
        match self {
            AttenuatorFamily::RfAttenuation => &config.rf_attenuation_db,
            AttenuatorFamily::AfGain => &config.af_gain_db,
        }
    }
}

/// Requested RF attenuation or AF gain values.
#[derive(Debug, Clone, PartialEq)]
pub enum AttenuatorSetting {
    /// One value; only valid with a single attenuator.
    Single(f64),
    /// One entry per attenuator; `None` leaves that index untouched.
    Sequence(Vec<Option<f64>>),
    /// Named entries such as `rfAttn2` or `afGain1`.
    Keyed(BTreeMap<String, f64>),
}

impl AttenuatorSetting {
    /// Resolves to `(index, value)` pairs with 1-based indices.
    pub fn resolve(&self, family: AttenuatorFamily, count: u8) -> ApresResult<Vec<(u8, f64)>> {
        let prefix = family.key_prefix();
        match self {
            AttenuatorSetting::Single(value) => {
                if count != 1 {
                    return Err(ApresError::AmbiguousAttenuatorAssignment {
                        family: prefix,
                        count,
                    });
                }
                Ok(vec![(1, *value)])
            }
            AttenuatorSetting::Sequence(values) => {
                if values.len() != count as usize {
                    return Err(ApresError::AttenuatorSequenceLength {
                        family: prefix,
                        expected: count,
                        actual: values.len(),
                    });
                }
                Ok(values
                    .iter()
                    .enumerate()
                    .filter_map(|(index, value)| value.map(|v| (index as u8 + 1, v)))
                    .collect())
            }
            AttenuatorSetting::Keyed(entries) => entries
                .iter()
                .map(|(key, value)| {
                    key.strip_prefix(prefix)
                        .filter(|suffix| suffix.bytes().all(|b| b.is_ascii_digit()))
                        .and_then(|suffix| suffix.parse::<u8>().ok())
                        .filter(|index| (1..=count).contains(index))
                        .map(|index| (index, *value))
                        .ok_or_else(|| ApresError::InvalidAttenuatorKey(key.clone()))
                })
                .collect(),
        }
    }
}

/// Partial configuration change; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub attenuator_count: Option<u8>,
    pub sub_burst_count: Option<u32>,
    pub average_count: Option<u32>,
    pub rf_attenuation: Option<AttenuatorSetting>,
    pub af_gain: Option<AttenuatorSetting>,
    pub tx_antenna: Option<AntennaMask>,
    pub rx_antenna: Option<AntennaMask>,
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Expectation {
    AttenuatorCount(u8),
    SubBursts(u32),
    Averages(u32),
    Attenuator(AttenuatorFamily, u8, f64),
    Tx(AntennaMask),
    Rx(AntennaMask),
    UserData(String),
}

impl Expectation {
    fn field_name(&self) -> String {
        match self {
            Expectation::AttenuatorCount(_) => "nAttenuators".into(),
            Expectation::SubBursts(_) => "nSubBursts".into(),
            Expectation::Averages(_) => "nAverages".into(),
            Expectation::Attenuator(family, index, _) => format!("{}{}", family.key_prefix(), index),
            Expectation::Tx(_) => "txAntenna".into(),
            Expectation::Rx(_) => "rxAntenna".into(),
            Expectation::UserData(_) => "userData".into(),
        }
    }

    fn wire_value(&self) -> String {
        match self {
            Expectation::AttenuatorCount(v) => v.to_string(),
            Expectation::SubBursts(v) | Expectation::Averages(v) => v.to_string(),
            Expectation::Attenuator(_, _, v) => v.to_string(),
            Expectation::Tx(mask) | Expectation::Rx(mask) => mask.to_wire(),
            Expectation::UserData(v) => v.clone(),
        }
    }

    fn holds(&self, config: &RadarConfig) -> bool {
        match self {
            Expectation::AttenuatorCount(v) => config.attenuator_count == *v,
            Expectation::SubBursts(v) => config.sub_burst_count == *v,
            Expectation::Averages(v) => config.average_count == *v,
            Expectation::Attenuator(family, index, v) => family
                .current(config)
                .get(*index as usize - 1)
                .map(|current| (current - v).abs() < VALUE_TOLERANCE)
                .unwrap_or(false),
            Expectation::Tx(mask) => config.tx_antenna == *mask,
            Expectation::Rx(mask) => config.rx_antenna == *mask,
            Expectation::UserData(v) => config.user_data == *v,
        }
    }
}

impl ConfigUpdate {
    /// Validates against the freshly synced `current` config and returns the
    /// minimal set of fields to post.
    fn plan(&self, current: &RadarConfig) -> ApresResult<Vec<Expectation>> {
        let mut plan = Vec::new();

        if let Some(count) = self.attenuator_count {
            if count == 0 || count > MAX_ATTENUATORS {
                return Err(ApresError::InvalidAttenuatorCount(count));
            }
            plan.push(Expectation::AttenuatorCount(count));
        }
        if let Some(v) = self.sub_burst_count {
            plan.push(Expectation::SubBursts(v));
        }
        if let Some(v) = self.average_count {
            plan.push(Expectation::Averages(v));
        }
        for (mask, tx) in [(self.tx_antenna, true), (self.rx_antenna, false)] {
            let Some(mask) = mask else { continue };
            if mask.is_empty() {
                return Err(ApresError::InvalidAntennaMask(format!(
                    "{} mask must enable at least one antenna",
                    if tx { "tx" } else { "rx" }
                )));
            }
            plan.push(if tx {
                Expectation::Tx(mask)
            } else {
                Expectation::Rx(mask)
            });
        }

        let effective_count = self.attenuator_count.unwrap_or(current.attenuator_count);
        for (setting, family) in [
            (&self.rf_attenuation, AttenuatorFamily::RfAttenuation),
            (&self.af_gain, AttenuatorFamily::AfGain),
        ] {
            if let Some(setting) = setting {
                for (index, value) in setting.resolve(family, effective_count)? {
                    plan.push(Expectation::Attenuator(family, index, value));
                }
            }
        }

        if let Some(user_data) = &self.user_data {
            let length = user_data.chars().count();
            if length > MAX_USER_DATA_LEN {
                return Err(ApresError::InvalidUserData(length));
            }
            plan.push(Expectation::UserData(user_data.clone()));
        }
        Ok(plan)
    }
}

impl<T: Transport> ApresClient<T> {
    /// Reads the device configuration and refreshes the local cache.
    pub fn sync_config(&mut self) -> ApresResult<RadarConfig> {
        let response = self.get("radar/config", &[])?;
        if response.status != 200 {
            return Err(ApresError::UnexpectedStatus {
                route: "radar/config".into(),
                status: response.status,
            });
        }
        let raw: RawConfig = parse_json(&response, "radar/config")?;
        let config = RadarConfig::try_from(raw)?;
        debug!("synced radar config {:?}", config);
        self.config = Some(config.clone());
        Ok(config)
    }

    /// Applies a partial update and verifies the device actually took it.
    pub fn update_config(&mut self, update: &ConfigUpdate) -> ApresResult<RadarConfig> {
        let current = self.sync_config()?;
        let plan = update.plan(&current)?;
        if plan.is_empty() {
            return Ok(current);
        }

        let form: Vec<(String, String)> = plan
            .iter()
            .map(|expectation| (expectation.field_name(), expectation.wire_value()))
            .collect();
        let response = self.post("radar/config", form)?;
        match response.status {
            200 => {}
            400 => {
                let message = ErrorEnvelope::parse(&response)
                    .and_then(|envelope| envelope.message)
                    .unwrap_or_else(|| response.text());
                return Err(ApresError::ConfigRejected(message));
            }
            status => {
                return Err(ApresError::UnexpectedStatus {
                    route: "radar/config".into(),
                    status,
                })
            }
        }

        let applied = self.sync_config()?;
        if let Some(missed) = plan.iter().find(|expectation| !expectation.holds(&applied)) {
            return Err(ApresError::ConfigNotApplied(missed.field_name()));
        }
        info!(
            "radar config updated: {} attenuators, {} sub-bursts, tx {}, rx {}",
            applied.attenuator_count, applied.sub_burst_count, applied.tx_antenna, applied.rx_antenna
        );
        Ok(applied)
    }
}
