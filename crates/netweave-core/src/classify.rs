// ── Device classification ──
//
// Ordered rule evaluation that assigns a device type and role from the
// attributes a sighting carries. Field names and operators are closed
// enums resolved when a rule is built; anything unrecognized is kept as
// an explicit variant that never matches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::model::{DeviceRole, MacAddress, NetworkDevice};

/// Rules at or below this confidence may only fill empty fields.
pub const OVERRIDE_CONFIDENCE: f64 = 0.8;

// ── Condition building blocks ───────────────────────────────────────

/// Device attribute a condition inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConditionField {
    Manufacturer,
    Hostname,
    DeviceType,
    PrimaryMac,
    Capabilities,
    Unrecognized(String),
}

impl FromStr for ConditionField {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "manufacturer" => Self::Manufacturer,
            "hostname" => Self::Hostname,
            "device_type" => Self::DeviceType,
            "primary_mac" => Self::PrimaryMac,
            "capabilities" => Self::Capabilities,
            other => Self::Unrecognized(other.to_owned()),
        })
    }
}

impl fmt::Display for ConditionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manufacturer => "manufacturer",
            Self::Hostname => "hostname",
            Self::DeviceType => "device_type",
            Self::PrimaryMac => "primary_mac",
            Self::Capabilities => "capabilities",
            Self::Unrecognized(name) => name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConditionOperator {
    /// Exact equality.
    Equals,
    /// Case-insensitive containment (membership for list fields).
    Contains,
    /// Field value is one of a supplied list.
    In,
    Unrecognized(String),
}

impl FromStr for ConditionOperator {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "equals" => Self::Equals,
            "contains" => Self::Contains,
            "in" => Self::In,
            other => Self::Unrecognized(other.to_owned()),
        })
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::In => "in",
            Self::Unrecognized(name) => name,
        })
    }
}

/// Comparison operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Text(String),
    List(Vec<String>),
}

/// Borrowed view of the device attribute under test.
enum FieldValue<'a> {
    Scalar(&'a str),
    List(&'a [String]),
}

/// One predicate over a device attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConditionSpec", into = "ConditionSpec")]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
}

/// Wire form of a [`Condition`]: plain strings for field and operator.
#[derive(Serialize, Deserialize)]
struct ConditionSpec {
    field: String,
    operator: String,
    value: ConditionValue,
}

impl From<ConditionSpec> for Condition {
    fn from(spec: ConditionSpec) -> Self {
        let field = spec.field.parse().unwrap_or_else(|e| match e {});
        let operator = spec.operator.parse().unwrap_or_else(|e| match e {});
        Self::new(field, operator, spec.value)
    }
}

impl From<Condition> for ConditionSpec {
    fn from(c: Condition) -> Self {
        Self {
            field: c.field.to_string(),
            operator: c.operator.to_string(),
            value: c.value,
        }
    }
}

impl Condition {
    /// Build a condition. MAC comparison values are normalized here so
    /// that `AA-BB-..` in a rule matches the normalized device field.
    pub fn new(field: ConditionField, operator: ConditionOperator, value: ConditionValue) -> Self {
        let value = if field == ConditionField::PrimaryMac {
            match value {
                ConditionValue::Text(v) => ConditionValue::Text(MacAddress::new(v).into()),
                ConditionValue::List(vs) => ConditionValue::List(
                    vs.into_iter().map(|v| MacAddress::new(v).into()).collect(),
                ),
            }
        } else {
            value
        };
        Self {
            field,
            operator,
            value,
        }
    }

    pub fn matches(&self, device: &NetworkDevice) -> bool {
        let Some(actual) = field_value(device, &self.field) else {
            return false;
        };

        match (&self.operator, actual, &self.value) {
            (ConditionOperator::Equals, FieldValue::Scalar(s), ConditionValue::Text(v)) => s == v,
            (ConditionOperator::Equals, FieldValue::List(l), ConditionValue::List(v)) => l == v,

            (ConditionOperator::Contains, FieldValue::Scalar(s), ConditionValue::Text(v)) => {
                !s.is_empty() && !v.is_empty() && s.to_lowercase().contains(&v.to_lowercase())
            }
            (ConditionOperator::Contains, FieldValue::List(l), ConditionValue::Text(v)) => {
                l.iter().any(|item| item.eq_ignore_ascii_case(v))
            }

            (ConditionOperator::In, FieldValue::Scalar(s), ConditionValue::List(vs)) => {
                vs.iter().any(|v| v == s)
            }
            (ConditionOperator::In, FieldValue::List(l), ConditionValue::List(vs)) => {
                l.iter().any(|item| vs.contains(item))
            }

            // Operand shapes that cannot be compared, and unknown operators.
            _ => false,
        }
    }
}

fn field_value<'a>(device: &'a NetworkDevice, field: &ConditionField) -> Option<FieldValue<'a>> {
    Some(match field {
        ConditionField::Manufacturer => FieldValue::Scalar(&device.manufacturer),
        ConditionField::Hostname => FieldValue::Scalar(&device.hostname),
        ConditionField::DeviceType => FieldValue::Scalar(&device.device_type),
        ConditionField::PrimaryMac => FieldValue::Scalar(device.primary_mac.as_str()),
        ConditionField::Capabilities => FieldValue::List(&device.capabilities),
        ConditionField::Unrecognized(_) => return None,
    })
}

// ── Rules ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Left untouched on the device when empty.
    #[serde(default)]
    pub device_type: String,
    /// Left untouched on the device when absent.
    #[serde(default)]
    pub role: Option<DeviceRole>,
    pub confidence: f64,
}

impl ClassificationRule {
    /// A rule with no conditions matches every device.
    pub fn matches(&self, device: &NetworkDevice) -> bool {
        self.conditions.iter().all(|c| c.matches(device))
    }

    /// Reject rules that could never behave as written.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(CoreError::validation(format!(
                "rule {}: confidence {} is outside [0, 1]",
                self.id, self.confidence
            )));
        }
        for condition in &self.conditions {
            if let ConditionField::Unrecognized(name) = &condition.field {
                return Err(CoreError::validation(format!(
                    "rule {}: unknown condition field '{name}'",
                    self.id
                )));
            }
            if let ConditionOperator::Unrecognized(name) = &condition.operator {
                return Err(CoreError::validation(format!(
                    "rule {}: unknown condition operator '{name}'",
                    self.id
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, device: &mut NetworkDevice) {
        let may_override = self.confidence > OVERRIDE_CONFIDENCE;

        if !self.device_type.is_empty() && (device.device_type.is_empty() || may_override) {
            device.device_type.clone_from(&self.device_type);
        }
        if self.role.is_some() && (device.role.is_none() || may_override) {
            device.role = self.role;
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Stateless evaluator over an ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Apply the first matching rule to `device`. Returns the rule used.
    pub fn classify(&self, device: &mut NetworkDevice) -> Option<&ClassificationRule> {
        let rule = self.rules.iter().find(|r| r.matches(device))?;
        rule.apply(device);

        debug!(
            device_id = %device.device_id,
            device_type = %device.device_type,
            role = ?device.role,
            rule = %rule.name,
            confidence = rule.confidence,
            "device classified"
        );
        Some(rule)
    }
}
