use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_ROUND_DIGITS: u32 = 2;
pub const DEFAULT_TIMESPAN: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const MAX_TIMESPAN: Duration = Duration::from_secs(366 * 24 * 60 * 60);

const BINARY_DOMAIN: &str = "binary_sensor";
const MAX_ROUND_DIGITS: u32 = 12;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no entity ids configured (set CHANGE_ENTITY_IDS)")]
    NoEntities,
    #[error("invalid timespan '{0}', expected HH:MM or HH:MM:SS")]
    InvalidTimespan(String),
    #[error("timespan must be a whole number of minutes and at least one minute")]
    TimespanGranularity,
    #[error("timespan must not exceed 366 days")]
    TimespanTooLong,
    #[error("invalid round digits '{0}'")]
    InvalidRoundDigits(String),
    #[error("invalid poll interval '{0}'")]
    InvalidPollInterval(String),
}

/// Whether a source reports numbers or on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Numeric,
    Binary,
}

impl SourceKind {
    pub fn of(entity_id: &str) -> Self {
        match entity_id.split('.').next() {
            Some(BINARY_DOMAIN) => SourceKind::Binary,
            _ => SourceKind::Numeric,
        }
    }
}

/// Which configured entity is tracked for values and which one gates accumulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoles {
    pub value: String,
    pub gate: Option<String>,
}

impl SourceRoles {
    /// Picks the value and gate sources, logging a warning for arrangements that are
    /// only partly honored.
    pub fn resolve(entity_ids: &[String]) -> Result<Self, ConfigError> {
        match entity_ids {
            [] => Err(ConfigError::NoEntities),
            [only] => {
                if SourceKind::of(only) == SourceKind::Binary {
                    warn!("Only a binary source '{only}' is configured, its states will read as unknown values");
                }
                Ok(Self {
                    value: only.clone(),
                    gate: None,
                })
            }
            [first, second] => match (SourceKind::of(first), SourceKind::of(second)) {
                (SourceKind::Binary, kind) => {
                    if kind == SourceKind::Binary {
                        warn!("Both sources are binary, '{second}' will read as unknown values");
                    }
                    Ok(Self {
                        value: second.clone(),
                        gate: Some(first.clone()),
                    })
                }
                (SourceKind::Numeric, SourceKind::Binary) => Ok(Self {
                    value: first.clone(),
                    gate: Some(second.clone()),
                }),
                (SourceKind::Numeric, SourceKind::Numeric) => {
                    warn!("Two numeric sources configured, only '{first}' will be used and '{second}' is ignored");
                    Ok(Self {
                        value: first.clone(),
                        gate: None,
                    })
                }
            },
            [first, ..] => {
                warn!(
                    "Too many entity ids ({}), only the first entity '{first}' will be used",
                    entity_ids.len()
                );
                Ok(Self {
                    value: first.clone(),
                    gate: None,
                })
            }
        }
    }
}

/// Validated configuration for one change sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub name: String,
    pub sensor_entity_id: String,
    pub entity_ids: Vec<String>,
    pub roles: SourceRoles,
    pub round_digits: u32,
    pub timespan: Duration,
    pub poll_interval: Duration,
}

impl SensorConfig {
    pub fn new(
        entity_ids: Vec<String>,
        name: Option<String>,
        round_digits: u32,
        timespan: Duration,
    ) -> Result<Self, ConfigError> {
        let entity_ids: Vec<String> = entity_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        let roles = SourceRoles::resolve(&entity_ids)?;

        if timespan.as_secs() < 60 || timespan.as_secs() % 60 != 0 || timespan.subsec_nanos() != 0
        {
            return Err(ConfigError::TimespanGranularity);
        }
        if timespan > MAX_TIMESPAN {
            return Err(ConfigError::TimespanTooLong);
        }
        if round_digits > MAX_ROUND_DIGITS {
            return Err(ConfigError::InvalidRoundDigits(round_digits.to_string()));
        }

        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(timespan));
        let sensor_entity_id = format!("sensor.{}", slugify(&name));

        Ok(Self {
            name,
            sensor_entity_id,
            entity_ids,
            roles,
            round_digits,
            timespan,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Builds the configuration from the `CHANGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let entity_ids = lookup("CHANGE_ENTITY_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::to_string)
            .collect();

        let round_digits = match lookup("CHANGE_ROUND_DIGITS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidRoundDigits(raw))?,
            None => DEFAULT_ROUND_DIGITS,
        };

        let timespan = match lookup("CHANGE_TIMESPAN") {
            Some(raw) => parse_timespan(&raw)?,
            None => DEFAULT_TIMESPAN,
        };

        let mut config = Self::new(entity_ids, lookup("CHANGE_NAME"), round_digits, timespan)?;

        if let Some(entity) = lookup("CHANGE_SENSOR_ENTITY").filter(|e| !e.trim().is_empty()) {
            config.sensor_entity_id = entity.trim().to_string();
        }
        if let Some(raw) = lookup("CHANGE_POLL_MS") {
            let millis: u64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidPollInterval(raw))?;
            config.poll_interval = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

/// Parses `HH:MM` or `HH:MM:SS`.
pub fn parse_timespan(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidTimespan(raw.to_string());
    let parts: Vec<u64> = raw
        .trim()
        .split(':')
        .map(|part| part.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<_, _>>()?;

    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }
    let total = hours
        .checked_mul(3600)
        .and_then(|secs| secs.checked_add(minutes * 60 + seconds))
        .ok_or_else(invalid)?;
    Ok(Duration::from_secs(total))
}

/// Formats a timespan like `1:00:00`, or `1 day, 0:00:00` past a day.
pub fn format_timespan(timespan: Duration) -> String {
    let total = timespan.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let clock = format!("{hours}:{minutes:02}:{seconds:02}");
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

fn default_name(timespan: Duration) -> String {
    format!("Delta per {} hour sensor", format_timespan(timespan))
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}
