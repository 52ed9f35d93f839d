//! Trigger conditions and their evaluation against an application.
//!
//! Application attributes are reached through a [`FieldRegistry`], a fixed
//! map from the field names operators may use in configs to typed extractor
//! functions. Comparisons are typed: numbers compare with numbers, text with
//! text, booleans only for equality, timestamps with RFC 3339 strings.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::actions::parse_config;
use super::errors::ConfigurationError;
use super::model::{Application, ConditionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Microseconds,
}

impl IntervalUnit {
    fn micros_per_unit(&self) -> f64 {
        match self {
            IntervalUnit::Weeks => 7.0 * 86_400e6,
            IntervalUnit::Days => 86_400e6,
            IntervalUnit::Hours => 3_600e6,
            IntervalUnit::Minutes => 60e6,
            IntervalUnit::Seconds => 1e6,
            IntervalUnit::Milliseconds => 1e3,
            IntervalUnit::Microseconds => 1.0,
        }
    }

    /// `value` units as a duration, truncated to whole microseconds.
    pub fn duration(&self, value: f64) -> Result<TimeDelta, ConfigurationError> {
        let micros = value * self.micros_per_unit();
        if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
            return Err(ConfigurationError::InvalidInterval(format!(
                "{value} {self:?} is out of range"
            )));
        }
        Ok(TimeDelta::microseconds(micros as i64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
        }
    }
}

fn default_time_field() -> String {
    "updated_at".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeExpirationConfig {
    pub interval: IntervalUnit,
    pub value: f64,
    #[serde(default = "default_time_field")]
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusCheckConfig {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldComparisonConfig {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// A decoded trigger step.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    TimeExpiration(TimeExpirationConfig),
    StatusCheck(StatusCheckConfig),
    FieldComparison(FieldComparisonConfig),
}

impl Condition {
    pub fn parse(condition_type: &str, config: &str) -> Result<Self, ConfigurationError> {
        let condition_type: ConditionType = condition_type
            .parse()
            .map_err(ConfigurationError::UnknownConditionType)?;
        let kind = condition_type.as_str();
        match condition_type {
            ConditionType::TimeExpiration => parse_config(kind, config).map(Condition::TimeExpiration),
            ConditionType::StatusCheck => parse_config(kind, config).map(Condition::StatusCheck),
            ConditionType::FieldComparison => {
                parse_config(kind, config).map(Condition::FieldComparison)
            }
        }
    }
}

/// Typed value of an application attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::Bool(_) => "boolean",
            FieldValue::Timestamp(_) => "timestamp",
        }
    }
}

pub type FieldExtractor = fn(&Application) -> Option<FieldValue>;

fn text(value: &Option<String>) -> Option<FieldValue> {
    value.clone().map(FieldValue::Text)
}

/// Name to extractor map for the attributes conditions may reference.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    extractors: BTreeMap<&'static str, FieldExtractor>,
}

impl FieldRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every application attribute exposed to trigger configs.
    pub fn standard() -> Self {
        Self::empty()
            .with("id", |a| Some(FieldValue::Integer(a.id)))
            .with("event_id", |a| a.event_id.map(FieldValue::Integer))
            .with("status", |a| Some(FieldValue::Text(a.status.name.clone())))
            .with("message", |a| text(&a.message))
            .with("comment", |a| text(&a.comment))
            .with("is_link", |a| Some(FieldValue::Bool(a.is_link)))
            .with("is_approved", |a| Some(FieldValue::Bool(a.is_approved)))
            .with("submitted_at", |a| Some(FieldValue::Timestamp(a.submitted_at)))
            .with("date_sub", |a| Some(FieldValue::Timestamp(a.submitted_at)))
            .with("updated_at", |a| Some(FieldValue::Timestamp(a.updated_at)))
            .with("date_end", |a| a.date_end.map(FieldValue::Timestamp))
            .with("surname", |a| text(&a.profile.surname))
            .with("name", |a| text(&a.profile.name))
            .with("patronymic", |a| text(&a.profile.patronymic))
            .with("course", |a| a.profile.course.map(FieldValue::Integer))
            .with("university", |a| text(&a.profile.university))
            .with("job", |a| text(&a.profile.job))
            .with("telegram", |a| text(&a.profile.telegram))
            .with("email", |a| text(&a.profile.email))
    }

    pub fn with(mut self, name: &'static str, extractor: FieldExtractor) -> Self {
        self.extractors.insert(name, extractor);
        self
    }

    pub fn get(&self, name: &str) -> Option<FieldExtractor> {
        self.extractors.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.extractors.keys().copied()
    }

    /// Read `name` from `application`; `Ok(None)` when the attribute is unset.
    pub fn read(
        &self,
        name: &str,
        application: &Application,
    ) -> Result<Option<FieldValue>, ConfigurationError> {
        let extractor = self
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownField(name.to_string()))?;
        Ok(extractor(application))
    }
}

#[derive(Debug, Clone)]
pub struct TriggerEvaluator {
    fields: FieldRegistry,
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new(FieldRegistry::standard())
    }
}

impl TriggerEvaluator {
    pub fn new(fields: FieldRegistry) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    pub fn evaluate(
        &self,
        condition: &Condition,
        application: &Application,
    ) -> Result<bool, ConfigurationError> {
        self.evaluate_at(condition, application, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        condition: &Condition,
        application: &Application,
        now: DateTime<Utc>,
    ) -> Result<bool, ConfigurationError> {
        match condition {
            Condition::TimeExpiration(config) => self.time_expired(config, application, now),
            Condition::StatusCheck(config) => Ok(application.status.name == config.status),
            Condition::FieldComparison(config) => {
                let actual = self.fields.read(&config.field, application)?;
                compare(&config.field, actual.as_ref(), config.operator, &config.value)
            }
        }
    }

    fn time_expired(
        &self,
        config: &TimeExpirationConfig,
        application: &Application,
        now: DateTime<Utc>,
    ) -> Result<bool, ConfigurationError> {
        let interval = config.interval.duration(config.value)?;
        match self.fields.read(&config.field, application)? {
            None => Ok(false),
            Some(FieldValue::Timestamp(since)) => {
                let deadline = since.checked_add_signed(interval).ok_or_else(|| {
                    ConfigurationError::InvalidInterval(format!(
                        "{} {:?} after {since} overflows",
                        config.value, config.interval
                    ))
                })?;
                Ok(now > deadline)
            }
            Some(other) => Err(ConfigurationError::TypeMismatch {
                field: config.field.clone(),
                found: other.type_name(),
                expected: "a time interval",
            }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn compare(
    field: &str,
    actual: Option<&FieldValue>,
    operator: Operator,
    expected: &Value,
) -> Result<bool, ConfigurationError> {
    // A missing value on either side equals nothing.
    let Some(actual) = actual.filter(|_| !expected.is_null()) else {
        return Ok(operator == Operator::Ne);
    };

    let mismatch = || ConfigurationError::TypeMismatch {
        field: field.to_string(),
        found: actual.type_name(),
        expected: json_type_name(expected),
    };

    let ordering = match (actual, expected) {
        (FieldValue::Integer(lhs), Value::Number(rhs)) => match rhs.as_i64() {
            Some(rhs) => Some(lhs.cmp(&rhs)),
            None => rhs.as_f64().and_then(|rhs| (*lhs as f64).partial_cmp(&rhs)),
        },
        (FieldValue::Float(lhs), Value::Number(rhs)) => {
            rhs.as_f64().and_then(|rhs| lhs.partial_cmp(&rhs))
        }
        (FieldValue::Text(lhs), Value::String(rhs)) => Some(lhs.as_str().cmp(rhs.as_str())),
        (FieldValue::Bool(lhs), Value::Bool(rhs)) => {
            if matches!(operator, Operator::Gt | Operator::Lt) {
                return Err(ConfigurationError::UnsupportedOperator {
                    operator: operator.as_str(),
                    kind: "boolean",
                });
            }
            Some(lhs.cmp(rhs))
        }
        (FieldValue::Timestamp(lhs), Value::String(rhs)) => {
            let rhs = DateTime::parse_from_rfc3339(rhs)
                .map_err(|_| ConfigurationError::TypeMismatch {
                    field: field.to_string(),
                    found: actual.type_name(),
                    expected: "an RFC 3339 string",
                })?
                .with_timezone(&Utc);
            Some(lhs.cmp(&rhs))
        }
        _ => return Err(mismatch()),
    };

    Ok(ordering.is_some_and(|ordering| operator.holds(ordering)))
}
