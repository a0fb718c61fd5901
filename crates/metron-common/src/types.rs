use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Reserved counter incremented once per poll tick and reset after a
/// successful report.
pub const POLL_COUNT: &str = "PollCount";

/// Metric kind, fixed for an id on its first write.
///
/// # Examples
///
/// ```
/// use metron_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(WireError::UnknownKind(other.to_string())),
        }
    }
}

/// A metric value: a float reading for gauges, an integer total for counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a plain-text value as the given kind.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, WireError> {
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(MetricValue::Gauge)
                .ok_or_else(|| WireError::Malformed(format!("invalid gauge value '{raw}'"))),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| WireError::Malformed(format!("invalid counter value '{raw}'"))),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // `{}` on f64 prints the shortest representation that round-trips.
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// A stored metric. Serializes through [`MetricWire`] so the snapshot file,
/// the wire batch and the JSON API share one per-record shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricWire", into = "MetricWire")]
pub struct MetricRecord {
    pub id: String,
    pub value: MetricValue,
}

impl MetricRecord {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn as_gauge(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Counter(_) => None,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(d) => Some(d),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Canonical string covered by the per-record integrity hash.
    pub fn hash_input(&self) -> String {
        match self.value {
            MetricValue::Gauge(v) => format!("{}:gauge:{v}", self.id),
            MetricValue::Counter(d) => format!("{}:counter:{d}", self.id),
        }
    }
}

/// Transport shape of a metric: `{id, type, value?, delta?, hash?}`.
///
/// The `type` is kept as a raw string so an unknown kind can be told apart
/// from a malformed value when converting into a [`MetricRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWire {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl MetricWire {
    pub fn with_hash(mut self, hash: String) -> Self {
        self.hash = Some(hash);
        self
    }
}

impl From<MetricRecord> for MetricWire {
    fn from(record: MetricRecord) -> Self {
        let (value, delta) = match record.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        };
        Self {
            id: record.id,
            kind: record.value.kind().as_str().to_string(),
            value,
            delta,
            hash: None,
        }
    }
}

impl TryFrom<MetricWire> for MetricRecord {
    type Error = WireError;

    fn try_from(wire: MetricWire) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(WireError::Malformed("metric id is empty".to_string()));
        }
        let kind: MetricKind = wire.kind.parse()?;
        let value = match kind {
            MetricKind::Gauge => match wire.value {
                Some(v) if v.is_finite() => MetricValue::Gauge(v),
                Some(v) => {
                    return Err(WireError::Malformed(format!(
                        "gauge '{}' is not finite: {v}",
                        wire.id
                    )))
                }
                None => {
                    return Err(WireError::Malformed(format!(
                        "gauge '{}' has no value",
                        wire.id
                    )))
                }
            },
            MetricKind::Counter => wire.delta.map(MetricValue::Counter).ok_or_else(|| {
                WireError::Malformed(format!("counter '{}' has no delta", wire.id))
            })?,
        };
        Ok(Self { id: wire.id, value })
    }
}
