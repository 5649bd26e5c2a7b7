// Trigger conditions - predicates gating whether a trigger's actions run

use chrono::{Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::ExecutionContext;

/// Result of evaluating a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOutcome {
    Satisfied,
    NotSatisfied,
    /// Evaluation could not be completed, e.g. incomparable values
    Error(String),
}

impl ConditionOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, ConditionOutcome::Satisfied)
    }
}

impl From<bool> for ConditionOutcome {
    fn from(value: bool) -> Self {
        if value {
            ConditionOutcome::Satisfied
        } else {
            ConditionOutcome::NotSatisfied
        }
    }
}

impl From<Result<bool, String>> for ConditionOutcome {
    fn from(value: Result<bool, String>) -> Self {
        match value {
            Ok(satisfied) => satisfied.into(),
            Err(e) => ConditionOutcome::Error(e),
        }
    }
}

pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A pure predicate over an execution context.
pub trait Condition: Send + Sync {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome;

    fn description(&self) -> String;

    fn kind(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Entity fields read by this condition, checked against the entity schema at registration
    fn referenced_fields(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    // Equality
    Equals,
    NotEquals,

    // Ordering
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,

    // Membership
    In,
    NotIn,

    // String operations
    Contains,
    StartsWith,
    EndsWith,
    Regex,

    // Null checks
    IsNull,
    IsNotNull,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ComparisonOperator::Equals => "==",
            ComparisonOperator::NotEquals => "!=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEquals => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEquals => "<=",
            ComparisonOperator::In => "in",
            ComparisonOperator::NotIn => "not in",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::StartsWith => "starts with",
            ComparisonOperator::EndsWith => "ends with",
            ComparisonOperator::Regex => "matches",
            ComparisonOperator::IsNull => "is null",
            ComparisonOperator::IsNotNull => "is not null",
        };
        f.write_str(symbol)
    }
}

fn compare_values(actual: &Value, expected: &Value) -> Result<Ordering, String> {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
                .ok_or_else(|| format!("cannot order {} and {}", a, b))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(format!("cannot order {} against {}", actual, expected)),
    }
}

fn string_operands<'a>(actual: &'a Value, expected: &'a Value) -> Result<(String, String), String> {
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) => Ok((a.to_lowercase(), b.to_lowercase())),
        _ => Err(format!("string operator applied to {} and {}", actual, expected)),
    }
}

impl ComparisonOperator {
    /// Compare `actual` (missing is treated as null) against `expected`
    pub fn apply(&self, actual: Option<&Value>, expected: &Value) -> Result<bool, String> {
        let actual = actual.unwrap_or(&Value::Null);

        match self {
            ComparisonOperator::Equals => Ok(actual == expected),
            ComparisonOperator::NotEquals => Ok(actual != expected),
            ComparisonOperator::GreaterThan => Ok(compare_values(actual, expected)? == Ordering::Greater),
            ComparisonOperator::GreaterThanOrEquals => Ok(compare_values(actual, expected)? != Ordering::Less),
            ComparisonOperator::LessThan => Ok(compare_values(actual, expected)? == Ordering::Less),
            ComparisonOperator::LessThanOrEquals => Ok(compare_values(actual, expected)? != Ordering::Greater),
            ComparisonOperator::In | ComparisonOperator::NotIn => {
                let options = expected
                    .as_array()
                    .ok_or_else(|| format!("'{}' needs a list, got {}", self, expected))?;
                let found = options.contains(actual);
                Ok(if *self == ComparisonOperator::In { found } else { !found })
            }
            ComparisonOperator::Contains => match actual {
                Value::Array(items) => Ok(items.contains(expected)),
                _ => {
                    let (a, b) = string_operands(actual, expected)?;
                    Ok(a.contains(&b))
                }
            },
            ComparisonOperator::StartsWith => {
                let (a, b) = string_operands(actual, expected)?;
                Ok(a.starts_with(&b))
            }
            ComparisonOperator::EndsWith => {
                let (a, b) = string_operands(actual, expected)?;
                Ok(a.ends_with(&b))
            }
            ComparisonOperator::Regex => {
                let (Some(text), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
                    return Err(format!("regex applied to {} with pattern {}", actual, expected));
                };
                let re = regex::Regex::new(pattern).map_err(|e| format!("invalid pattern: {}", e))?;
                Ok(re.is_match(text))
            }
            ComparisonOperator::IsNull => Ok(actual.is_null()),
            ComparisonOperator::IsNotNull => Ok(!actual.is_null()),
        }
    }
}

// ===== Field conditions =====

/// Compares a field of the current instance against a value
#[derive(Debug, Clone)]
pub struct FieldValueCondition {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: Value,
}

impl FieldValueCondition {
    pub fn new(field: &str, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: value.into(),
        }
    }
}

impl Condition for FieldValueCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        let Some(instance) = ctx.instance.as_ref() else {
            return ConditionOutcome::Error(format!("no instance to read '{}' from", self.field));
        };
        self.operator.apply(instance.lookup(&self.field), &self.value).into()
    }

    fn description(&self) -> String {
        match self.operator {
            ComparisonOperator::IsNull | ComparisonOperator::IsNotNull => {
                format!("{} {}", self.field, self.operator)
            }
            _ => format!("{} {} {}", self.field, self.operator, self.value),
        }
    }

    fn referenced_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }
}

/// Holds when a field changed, optionally from and/or to specific values
#[derive(Debug, Clone)]
pub struct FieldChangedCondition {
    pub field: String,
    pub from: Option<Value>,
    pub to: Option<Value>,
}

impl FieldChangedCondition {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            from: None,
            to: None,
        }
    }

    pub fn from_value(mut self, value: impl Into<Value>) -> Self {
        self.from = Some(value.into());
        self
    }

    pub fn to_value(mut self, value: impl Into<Value>) -> Self {
        self.to = Some(value.into());
        self
    }
}

impl Condition for FieldChangedCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        let Some(change) = ctx.field_changes().get(&self.field) else {
            return ConditionOutcome::NotSatisfied;
        };
        let from_ok = self.from.as_ref().is_none_or(|v| *v == change.old);
        let to_ok = self.to.as_ref().is_none_or(|v| *v == change.new);
        (from_ok && to_ok).into()
    }

    fn description(&self) -> String {
        let mut desc = format!("{} changed", self.field);
        if let Some(from) = &self.from {
            desc.push_str(&format!(" from {}", from));
        }
        if let Some(to) = &self.to {
            desc.push_str(&format!(" to {}", to));
        }
        desc
    }

    fn referenced_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }
}

#[derive(Debug, Clone)]
pub struct MultipleFieldsChangedCondition {
    pub fields: Vec<String>,
    pub require_all: bool,
}

impl MultipleFieldsChangedCondition {
    pub fn any(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            require_all: false,
        }
    }

    pub fn all(fields: &[&str]) -> Self {
        Self {
            require_all: true,
            ..Self::any(fields)
        }
    }
}

impl Condition for MultipleFieldsChangedCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        let mut changed = self.fields.iter().map(|f| ctx.field_changed(f));
        if self.require_all {
            changed.all(|c| c).into()
        } else {
            changed.any(|c| c).into()
        }
    }

    fn description(&self) -> String {
        let mode = if self.require_all { "All" } else { "Any" };
        format!("{} of fields [{}] changed", mode, self.fields.join(", "))
    }

    fn referenced_fields(&self) -> Vec<String> {
        self.fields.clone()
    }
}

/// Holds when a status-like field moved along one of the allowed transitions
#[derive(Debug, Clone)]
pub struct StatusTransitionCondition {
    pub field: String,
    transitions: HashMap<String, Vec<String>>,
}

impl StatusTransitionCondition {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            transitions: HashMap::new(),
        }
    }

    pub fn allow(mut self, from: &str, to: &[&str]) -> Self {
        self.transitions
            .entry(from.to_string())
            .or_default()
            .extend(to.iter().map(|s| s.to_string()));
        self
    }
}

impl Condition for StatusTransitionCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        let Some(change) = ctx.field_changes().get(&self.field) else {
            return ConditionOutcome::NotSatisfied;
        };
        let (Some(from), Some(to)) = (change.old.as_str(), change.new.as_str()) else {
            return ConditionOutcome::NotSatisfied;
        };
        self.transitions
            .get(from)
            .is_some_and(|targets| targets.iter().any(|t| t == to))
            .into()
    }

    fn description(&self) -> String {
        let mut pairs: Vec<String> = self
            .transitions
            .iter()
            .map(|(from, to)| format!("{} -> {}", from, to.join("|")))
            .collect();
        pairs.sort();
        format!("{} transition in [{}]", self.field, pairs.join(", "))
    }

    fn referenced_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }
}

// ===== Context conditions =====

#[derive(Debug, Clone)]
pub struct UserRoleCondition {
    pub roles: Vec<String>,
}

impl UserRoleCondition {
    pub fn new(roles: &[&str]) -> Self {
        Self {
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl Condition for UserRoleCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        ctx.actor
            .as_ref()
            .is_some_and(|actor| self.roles.iter().any(|r| actor.has_role(r)))
            .into()
    }

    fn description(&self) -> String {
        format!("User has role in [{}]", self.roles.join(", "))
    }
}

/// Holds when the save created (or did not create) the instance
#[derive(Debug, Clone)]
pub struct CreatedCondition {
    pub created: bool,
}

impl Condition for CreatedCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        (ctx.created == Some(self.created)).into()
    }

    fn description(&self) -> String {
        if self.created {
            "Instance was created".to_string()
        } else {
            "Instance was updated".to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    /// Weekdays, `start_hour <= hour < end_hour`
    BusinessHours { start_hour: u32, end_hour: u32 },
    Weekend,
    AfterHour(u32),
}

/// Time-of-day gate evaluated at the context timestamp
#[derive(Debug, Clone)]
pub struct TimeWindowCondition {
    pub window: TimeWindow,
    pub offset: FixedOffset,
}

impl TimeWindowCondition {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            offset: Utc.fix(),
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }
}

impl Condition for TimeWindowCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        let local = ctx.timestamp.with_timezone(&self.offset);
        let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);

        match self.window {
            TimeWindow::BusinessHours { start_hour, end_hour } => {
                (!weekend && local.hour() >= start_hour && local.hour() < end_hour).into()
            }
            TimeWindow::Weekend => weekend.into(),
            TimeWindow::AfterHour(hour) => (local.hour() >= hour).into(),
        }
    }

    fn description(&self) -> String {
        match self.window {
            TimeWindow::BusinessHours { start_hour, end_hour } => {
                format!("During business hours ({}:00-{}:00)", start_hour, end_hour)
            }
            TimeWindow::Weekend => "During weekend".to_string(),
            TimeWindow::AfterHour(hour) => format!("After {}:00", hour),
        }
    }
}

type Predicate = Arc<dyn Fn(&ExecutionContext) -> Result<bool, String> + Send + Sync>;

/// Condition backed by a closure
#[derive(Clone)]
pub struct PredicateCondition {
    description: String,
    fields: Vec<String>,
    predicate: Predicate,
}

impl PredicateCondition {
    pub fn new<F>(description: &str, predicate: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        Self::fallible(description, move |ctx| Ok(predicate(ctx)))
    }

    pub fn fallible<F>(description: &str, predicate: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            description: description.to_string(),
            fields: Vec::new(),
            predicate: Arc::new(predicate),
        }
    }

    /// Declare the entity fields the closure reads
    pub fn reading(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

impl fmt::Debug for PredicateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateCondition")
            .field("description", &self.description)
            .finish()
    }
}

impl Condition for PredicateCondition {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        (self.predicate)(ctx).into()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn referenced_fields(&self) -> Vec<String> {
        self.fields.clone()
    }
}

// ===== Combinators =====

pub struct AllOf(pub Vec<Box<dyn Condition>>);

pub struct AnyOf(pub Vec<Box<dyn Condition>>);

pub struct Not(pub Box<dyn Condition>);

fn describe_all(conditions: &[Box<dyn Condition>], joiner: &str) -> String {
    let parts: Vec<String> = conditions.iter().map(|c| c.description()).collect();
    format!("({})", parts.join(joiner))
}

impl Condition for AllOf {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        for condition in &self.0 {
            match condition.evaluate(ctx) {
                ConditionOutcome::Satisfied => continue,
                other => return other,
            }
        }
        ConditionOutcome::Satisfied
    }

    fn description(&self) -> String {
        describe_all(&self.0, " AND ")
    }

    fn referenced_fields(&self) -> Vec<String> {
        self.0.iter().flat_map(|c| c.referenced_fields()).collect()
    }
}

impl Condition for AnyOf {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        let mut first_error = None;
        for condition in &self.0 {
            match condition.evaluate(ctx) {
                ConditionOutcome::Satisfied => return ConditionOutcome::Satisfied,
                ConditionOutcome::Error(e) => {
                    first_error.get_or_insert(e);
                }
                ConditionOutcome::NotSatisfied => {}
            }
        }
        first_error.map_or(ConditionOutcome::NotSatisfied, ConditionOutcome::Error)
    }

    fn description(&self) -> String {
        describe_all(&self.0, " OR ")
    }

    fn referenced_fields(&self) -> Vec<String> {
        self.0.iter().flat_map(|c| c.referenced_fields()).collect()
    }
}

impl Condition for Not {
    fn evaluate(&self, ctx: &ExecutionContext) -> ConditionOutcome {
        match self.0.evaluate(ctx) {
            ConditionOutcome::Satisfied => ConditionOutcome::NotSatisfied,
            ConditionOutcome::NotSatisfied => ConditionOutcome::Satisfied,
            error => error,
        }
    }

    fn description(&self) -> String {
        format!("NOT {}", self.0.description())
    }

    fn referenced_fields(&self) -> Vec<String> {
        self.0.referenced_fields()
    }
}

/// Shorthand constructors for common conditions
pub mod presets {
    use super::*;

    pub fn field_equals(field: &str, value: impl Into<Value>) -> FieldValueCondition {
        FieldValueCondition::new(field, ComparisonOperator::Equals, value)
    }

    pub fn field_changed(field: &str) -> FieldChangedCondition {
        FieldChangedCondition::new(field)
    }

    pub fn field_changed_to(field: &str, value: impl Into<Value>) -> FieldChangedCondition {
        FieldChangedCondition::new(field).to_value(value)
    }

    pub fn status_changed_to(status: &str) -> FieldChangedCondition {
        field_changed_to("status", status)
    }

    pub fn quantity_above(field: &str, threshold: f64) -> FieldValueCondition {
        FieldValueCondition::new(field, ComparisonOperator::GreaterThan, threshold)
    }

    pub fn quantity_below(field: &str, threshold: f64) -> FieldValueCondition {
        FieldValueCondition::new(field, ComparisonOperator::LessThan, threshold)
    }

    pub fn user_has_role(roles: &[&str]) -> UserRoleCondition {
        UserRoleCondition::new(roles)
    }

    pub fn on_create() -> CreatedCondition {
        CreatedCondition { created: true }
    }

    pub fn during_business_hours() -> TimeWindowCondition {
        TimeWindowCondition::new(TimeWindow::BusinessHours {
            start_hour: 9,
            end_hour: 17,
        })
    }
}
