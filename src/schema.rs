//! Typed form schema of a template and the answer values it governs.
//!
//! A template ships a config document describing an ordered list of steps,
//! each holding fields. Field names are unique across the whole config, so an
//! [`AnswerSet`] is a flat map keyed by field name.

use log::warn;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

static HEX_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid color pattern")
});

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug pattern"));

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to parse template config: {0}")]
    Parse(String),
    #[error("Template config declares no steps")]
    NoSteps,
    #[error("Field '{name}' is declared more than once")]
    DuplicateField { name: String },
    #[error("Field '{field}' has an invalid pattern: {message}")]
    InvalidPattern { field: String, message: String },
}

/// A value that does not fit the declared kind of its field.
#[derive(Error, Debug, PartialEq)]
#[error("Value '{value}' does not fit {kind} field '{field}'")]
pub struct ValueError {
    pub field: String,
    pub kind: FieldKind,
    pub value: String,
}

/// A single answer. Serialized as a bare JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AnswerValue {
    pub fn text(value: impl Into<String>) -> Self {
        AnswerValue::Text(value.into())
    }

    /// String form used when the value is substituted into a template.
    pub fn display(&self) -> String {
        match self {
            AnswerValue::Text(s) => s.clone(),
            AnswerValue::Bool(b) => b.to_string(),
            AnswerValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }

    /// Blank values fail a `required` rule.
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().is_empty(),
            AnswerValue::Bool(b) => !b,
            AnswerValue::Number(_) => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(n) => Some(*n),
            AnswerValue::Text(s) => s.trim().parse().ok(),
            AnswerValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        AnswerValue::Number(value)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Bool(value)
    }
}

/// Current answers keyed by field name. Ordered so every derived artifact is
/// reproducible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSet(BTreeMap<String, AnswerValue>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AnswerValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AnswerValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<AnswerValue> {
        self.0.remove(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnswerValue)> {
        self.0.iter()
    }

    /// Writes every entry of `other` over this set.
    pub fn overlay(&mut self, other: &AnswerSet) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Display string of an answer, if present.
    pub fn display(&self, name: &str) -> Option<String> {
        self.get(name).map(AnswerValue::display)
    }
}

impl<K: Into<String>, V: Into<AnswerValue>> FromIterator<(K, V)> for AnswerSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Textarea,
    Number,
    Color,
    Url,
    Email,
    #[serde(alias = "checkbox", alias = "bool")]
    Boolean,
    Select,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Number => "number",
            FieldKind::Color => "color",
            FieldKind::Url => "url",
            FieldKind::Email => "email",
            FieldKind::Boolean => "boolean",
            FieldKind::Select => "select",
        }
    }

    /// Value used when a field declares no default.
    pub fn zero_value(&self) -> AnswerValue {
        match self {
            FieldKind::Number => AnswerValue::Number(0.0),
            FieldKind::Boolean => AnswerValue::Bool(false),
            _ => AnswerValue::Text(String::new()),
        }
    }

    /// Converts a written value into the shape this kind stores.
    ///
    /// Empty text is accepted by every kind so a cleared input can be held
    /// until validation reports it.
    pub fn coerce(&self, field: &str, value: AnswerValue) -> Result<AnswerValue, ValueError> {
        let mismatch = |value: &AnswerValue| ValueError {
            field: field.to_string(),
            kind: *self,
            value: value.display(),
        };
        match (self, value) {
            (_, AnswerValue::Text(s)) if s.is_empty() => Ok(AnswerValue::Text(s)),
            (FieldKind::Number, AnswerValue::Number(n)) => Ok(AnswerValue::Number(n)),
            (FieldKind::Number, AnswerValue::Text(s)) => {
                let parsed = s.trim().parse::<f64>();
                match parsed {
                    Ok(n) => Ok(AnswerValue::Number(n)),
                    Err(_) => Err(mismatch(&AnswerValue::Text(s))),
                }
            }
            (FieldKind::Boolean, AnswerValue::Bool(b)) => Ok(AnswerValue::Bool(b)),
            (FieldKind::Boolean, AnswerValue::Text(s)) => match s.trim() {
                "true" => Ok(AnswerValue::Bool(true)),
                "false" => Ok(AnswerValue::Bool(false)),
                _ => Err(mismatch(&AnswerValue::text(s.as_str()))),
            },
            (FieldKind::Number | FieldKind::Boolean, other) => Err(mismatch(&other)),
            (_, AnswerValue::Text(s)) => Ok(AnswerValue::Text(s)),
            (_, other) => Ok(AnswerValue::Text(other.display())),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldOption {
    Plain(String),
    Labeled {
        value: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl FieldOption {
    pub fn value(&self) -> &str {
        match self {
            FieldOption::Plain(value) => value,
            FieldOption::Labeled { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Name of a predicate registered in [`Predicates`].
    #[serde(default)]
    pub custom: Option<String>,
    /// Replaces the generated message for any failing rule.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub default: Option<AnswerValue>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    pub options: Vec<FieldOption>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation: ValidationRules,
}

impl Field {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn is_required(&self) -> bool {
        self.required || self.validation.required
    }

    pub fn default_value(&self) -> AnswerValue {
        self.default
            .clone()
            .and_then(|value| self.kind.coerce(&self.name, value).ok())
            .unwrap_or_else(|| self.kind.zero_value())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Raw document shape: steps either at the top level or nested under
/// `formConfig`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    steps: Option<Vec<Step>>,
    #[serde(default)]
    form_config: Option<FormConfigDocument>,
}

#[derive(Deserialize)]
struct FormConfigDocument {
    #[serde(default)]
    steps: Vec<Step>,
}

/// Multi-step form definition of one template. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

impl TemplateConfig {
    pub fn from_json(content: &str) -> Result<Self, SchemaError> {
        let doc: ConfigDocument =
            serde_json::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SchemaError> {
        let doc: ConfigDocument =
            serde_yaml::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Builds a config from already-typed steps, applying the same checks as
    /// parsing.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, SchemaError> {
        let config = Self {
            name: None,
            description: None,
            steps,
        };
        config.check()
    }

    fn from_document(doc: ConfigDocument) -> Result<Self, SchemaError> {
        let steps = match (doc.form_config, doc.steps) {
            (Some(form), _) if !form.steps.is_empty() => form.steps,
            (_, Some(steps)) => steps,
            _ => Vec::new(),
        };
        let config = Self {
            name: doc.name,
            description: doc.description,
            steps,
        };
        config.check()
    }

    fn check(mut self) -> Result<Self, SchemaError> {
        if self.steps.is_empty() {
            return Err(SchemaError::NoSteps);
        }
        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter_mut().enumerate() {
            if step.id.is_empty() {
                step.id = (index + 1).to_string();
            }
            for field in &step.fields {
                if !seen.insert(field.name.clone()) {
                    return Err(SchemaError::DuplicateField {
                        name: field.name.clone(),
                    });
                }
                if let Some(pattern) = &field.validation.pattern {
                    Regex::new(pattern).map_err(|e| SchemaError::InvalidPattern {
                        field: field.name.clone(),
                        message: e.to_string(),
                    })?;
                }
            }
        }
        Ok(self)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Step at a 1-based position.
    pub fn step_at(&self, position: usize) -> Option<&Step> {
        position.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.steps.iter().flat_map(|s| s.fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().find(|f| f.name == name)
    }

    /// Applies write-time typing. Names outside the config pass through.
    pub fn coerce(&self, name: &str, value: AnswerValue) -> Result<AnswerValue, ValueError> {
        match self.field(name) {
            Some(field) => field.kind.coerce(name, value),
            None => Ok(value),
        }
    }
}

/// Declared default (or kind zero value) of every field.
pub fn extract_defaults(config: &TemplateConfig) -> AnswerSet {
    config
        .fields()
        .map(|field| (field.name.clone(), field.default_value()))
        .collect()
}

/// Fills keys missing from `existing` with their defaults. Present keys are
/// never overwritten.
pub fn merge_with_defaults(defaults: &AnswerSet, existing: &AnswerSet) -> AnswerSet {
    let mut merged = defaults.clone();
    merged.overlay(existing);
    merged
}

pub type Predicate = Arc<dyn Fn(&AnswerValue) -> bool + Send + Sync>;

/// Named predicates a field can reference through `validation.custom`.
#[derive(Clone)]
pub struct Predicates {
    rules: HashMap<String, Predicate>,
}

impl Predicates {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&AnswerValue) -> bool + Send + Sync + 'static,
    ) {
        self.rules.insert(name.into(), Arc::new(predicate));
    }

    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.rules.get(name)
    }
}

impl Default for Predicates {
    fn default() -> Self {
        let mut predicates = Self::empty();
        predicates.register("email", |v| EMAIL_RE.is_match(&v.display()));
        predicates.register("url", |v| is_web_url(&v.display()));
        predicates.register("hex_color", |v| HEX_COLOR_RE.is_match(&v.display()));
        predicates.register("slug", |v| SLUG_RE.is_match(&v.display()));
        predicates
    }
}

fn is_web_url(value: &str) -> bool {
    reqwest::Url::parse(value.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

/// Error messages keyed by field name. Absent key means the field passed.
pub type ValidationErrors = BTreeMap<String, String>;

/// Checks one field against its current value.
pub fn validate_field(
    field: &Field,
    value: Option<&AnswerValue>,
    predicates: &Predicates,
) -> Result<(), String> {
    let rules = &field.validation;
    let label = field.label();
    let fail = |generated: String| Err(rules.message.clone().unwrap_or(generated));

    let value = match value {
        Some(v) if !v.is_blank() => v,
        _ if field.is_required() => return fail(format!("{} is required", label)),
        _ => return Ok(()),
    };
    let text = value.display();

    match field.kind {
        FieldKind::Number => {
            let Some(n) = value.as_number() else {
                return fail(format!("{} must be a number", label));
            };
            if let Some(min) = rules.min {
                if n < min {
                    return fail(format!("{} must be at least {}", label, min));
                }
            }
            if let Some(max) = rules.max {
                if n > max {
                    return fail(format!("{} must be at most {}", label, max));
                }
            }
        }
        FieldKind::Url if !is_web_url(&text) => {
            return fail(format!("{} must be a valid URL", label));
        }
        FieldKind::Email if !EMAIL_RE.is_match(text.trim()) => {
            return fail(format!("{} must be a valid email address", label));
        }
        FieldKind::Color if !HEX_COLOR_RE.is_match(text.trim()) => {
            return fail(format!("{} must be a hex color like #1a2b3c", label));
        }
        FieldKind::Boolean if !matches!(value, AnswerValue::Bool(_)) => {
            return fail(format!("{} must be true or false", label));
        }
        FieldKind::Select
            if !field.options.is_empty() && !field.options.iter().any(|o| o.value() == text) =>
        {
            let allowed: Vec<&str> = field.options.iter().map(FieldOption::value).collect();
            return fail(format!("{} must be one of: {}", label, allowed.join(", ")));
        }
        _ => {}
    }

    let length = text.chars().count();
    if let Some(min) = rules.min_length {
        if length < min {
            return fail(format!("{} must be at least {} characters", label, min));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max {
            return fail(format!("{} must be at most {} characters", label, max));
        }
    }
    if let Some(pattern) = &rules.pattern {
        let matches = Regex::new(pattern)
            .map(|re| re.is_match(&text))
            .unwrap_or(true);
        if !matches {
            return fail(format!("{} has an invalid format", label));
        }
    }
    if let Some(name) = &rules.custom {
        match predicates.get(name) {
            Some(predicate) if !predicate(value) => {
                return fail(format!("{} is invalid", label));
            }
            Some(_) => {}
            None => warn!("Unknown validation predicate '{}' on field '{}'", name, field.name),
        }
    }
    Ok(())
}

pub fn validate_step(step: &Step, answers: &AnswerSet, predicates: &Predicates) -> ValidationErrors {
    step.fields
        .iter()
        .filter_map(|field| {
            validate_field(field, answers.get(&field.name), predicates)
                .err()
                .map(|message| (field.name.clone(), message))
        })
        .collect()
}

pub fn validate_all(
    config: &TemplateConfig,
    answers: &AnswerSet,
    predicates: &Predicates,
) -> ValidationErrors {
    config
        .steps
        .iter()
        .flat_map(|step| validate_step(step, answers, predicates))
        .collect()
}
