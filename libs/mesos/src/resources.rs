//! Resources and offers.

use serde::{Deserialize, Serialize};
use tierd_id::{AgentId, FrameworkId, OfferId};

/// Resource name for CPU shares.
pub const CPUS: &str = "cpus";
/// Resource name for memory in MB.
pub const MEM: &str = "mem";
/// Resource name for disk in MB.
pub const DISK: &str = "disk";
/// Resource name for host port ranges.
pub const PORTS: &str = "ports";

/// Value type of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Scalar,
    Ranges,
    Set,
    Text,
    #[serde(other)]
    Unknown,
}

/// A scalar quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    pub value: f64,
}

/// An inclusive range `[begin, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

impl Range {
    /// Returns true if `value` lies within the range.
    pub fn contains(&self, value: u64) -> bool {
        self.begin <= value && value <= self.end
    }
}

/// A list of ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranges {
    #[serde(default)]
    pub range: Vec<Range>,
}

/// A typed resource quantity as it appears in offers and task infos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ValueType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Ranges>,
}

impl Resource {
    /// Creates a scalar resource.
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: ValueType::Scalar,
            scalar: Some(Scalar { value }),
            ranges: None,
        }
    }

    /// Creates a ranges resource from `(begin, end)` pairs.
    pub fn ranges(name: impl Into<String>, ranges: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            name: name.into(),
            kind: ValueType::Ranges,
            scalar: None,
            ranges: Some(Ranges {
                range: ranges
                    .into_iter()
                    .map(|(begin, end)| Range { begin, end })
                    .collect(),
            }),
        }
    }

    /// Returns the scalar value if this is a well-formed scalar resource.
    pub fn scalar_value(&self) -> Option<f64> {
        match (self.kind, self.scalar) {
            (ValueType::Scalar, Some(scalar)) => Some(scalar.value),
            _ => None,
        }
    }

    /// Returns the ranges if this is a ranges resource, or an empty slice.
    pub fn range_values(&self) -> &[Range] {
        match (self.kind, &self.ranges) {
            (ValueType::Ranges, Some(ranges)) => &ranges.range,
            _ => &[],
        }
    }
}

/// A resource offer from one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<FrameworkId>,

    pub agent_id: AgentId,

    pub hostname: String,

    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Offer {
    /// Creates an offer with the given resources.
    pub fn new(
        id: OfferId,
        agent_id: AgentId,
        hostname: impl Into<String>,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            id,
            framework_id: None,
            agent_id,
            hostname: hostname.into(),
            resources,
        }
    }
}

/// Offer filters attached to ACCEPT and DECLINE calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub refuse_seconds: f64,
}

impl Filters {
    /// Refuse further offers for the given agent for `seconds`.
    pub fn refuse(seconds: f64) -> Self {
        Self {
            refuse_seconds: seconds,
        }
    }
}
