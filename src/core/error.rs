//! Engine errors and the structured errors collected per run

use crate::execution::{LineId, RunId};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the engine itself
#[derive(Debug, Error)]
pub enum FlowError {
    /// A line cannot hold as many stages as the abort sentinel
    #[error("line has {handlers} handlers, must be below {limit}")]
    TooManyHandlers { handlers: usize, limit: usize },

    /// A line needs at least one stage
    #[error("line must have at least one handler")]
    EmptyLine,

    #[error("line {0} not found")]
    LineNotFound(LineId),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// A jump targeted a stage the line does not have
    #[error("stage {stage} is out of range for a line of {len} stages")]
    StageOutOfRange { stage: usize, len: usize },

    /// A stopped line has released its handlers
    #[error("line is stopped")]
    LineStopped,

    /// The first stage of a run could not be reached
    #[error("could not deliver the run to stage {stage}")]
    DeliveryFailed { stage: usize },

    /// Runs are scheduled on tokio and need a runtime to spawn onto
    #[error("no tokio runtime available to schedule the run")]
    NoRuntime,
}

impl FlowError {
    /// True for the configuration class (rejected line definitions)
    pub fn is_configuration(&self) -> bool {
        matches!(self, FlowError::TooManyHandlers { .. } | FlowError::EmptyLine)
    }

    /// True when an unknown line or run handle was used
    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::LineNotFound(_) | FlowError::RunNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// Classification bitmask of a [`StructuredError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorType(u64);

impl ErrorType {
    pub const PRIVATE: ErrorType = ErrorType(1 << 0);
    pub const PUBLIC: ErrorType = ErrorType(1 << 1);
    pub const ANY: ErrorType = ErrorType(u64::MAX);

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True if any flag of `other` is set in `self`
    pub const fn intersects(self, other: ErrorType) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for ErrorType {
    fn default() -> Self {
        ErrorType::PRIVATE
    }
}

impl BitOr for ErrorType {
    type Output = ErrorType;

    fn bitor(self, rhs: ErrorType) -> ErrorType {
        ErrorType(self.0 | rhs.0)
    }
}

/// An error attached to a run, with classification and optional metadata
#[derive(Debug, Clone)]
pub struct StructuredError {
    source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    kind: ErrorType,
    meta: Option<Value>,
    occurred_at: DateTime<Utc>,
}

impl StructuredError {
    /// Wrap an error with the default (private) classification
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into().into();
        Self {
            source: Arc::from(boxed),
            kind: ErrorType::PRIVATE,
            meta: None,
            occurred_at: Utc::now(),
        }
    }

    /// Accept an error as-is if it already is a `StructuredError`, wrap it otherwise
    pub fn from_any(err: impl Into<anyhow::Error>) -> Self {
        match err.into().downcast::<StructuredError>() {
            Ok(structured) => structured,
            Err(other) => StructuredError::new(other),
        }
    }

    pub fn with_type(mut self, kind: ErrorType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub(crate) fn set_type(&mut self, kind: ErrorType) {
        self.kind = kind;
    }

    pub(crate) fn set_meta(&mut self, meta: Value) {
        self.meta = Some(meta);
    }

    pub fn kind(&self) -> ErrorType {
        self.kind
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn is_type(&self, flags: ErrorType) -> bool {
        self.kind.intersects(flags)
    }

    /// JSON view of the error
    ///
    /// Object metadata is merged into the result; any other metadata is
    /// nested under `meta`. An `error` field with the message is added
    /// unless the metadata already provides one.
    pub fn to_json(&self) -> Value {
        let mut json = Map::new();
        match &self.meta {
            Some(Value::Object(fields)) => {
                for (key, value) in fields {
                    json.insert(key.clone(), value.clone());
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                json.insert("meta".to_string(), other.clone());
            }
        }
        json.entry("error")
            .or_insert_with(|| Value::String(self.to_string()));
        Value::Object(json)
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for StructuredError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

impl Serialize for StructuredError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Ordered list of errors attached to a run
#[derive(Debug, Clone, Default)]
pub struct ErrorList(Vec<StructuredError>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push(&mut self, err: StructuredError) -> usize {
        self.0.push(err);
        self.0.len() - 1
    }

    pub(crate) fn get_mut(&mut self, position: usize) -> Option<&mut StructuredError> {
        self.0.get_mut(position)
    }

    pub fn get(&self, position: usize) -> Option<&StructuredError> {
        self.0.get(position)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructuredError> {
        self.0.iter()
    }

    /// Errors matching any of the given flags, in their original order
    pub fn by_type(&self, flags: ErrorType) -> ErrorList {
        if flags == ErrorType::ANY {
            return self.clone();
        }
        ErrorList(
            self.0
                .iter()
                .filter(|err| err.is_type(flags))
                .cloned()
                .collect(),
        )
    }

    /// The most recently attached error
    pub fn last(&self) -> Option<&StructuredError> {
        self.0.last()
    }

    /// All error messages, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(|err| err.to_string()).collect()
    }

    /// `null` when empty, a single object for one error, an array otherwise
    pub fn to_json(&self) -> Value {
        match self.0.as_slice() {
            [] => Value::Null,
            [only] => only.to_json(),
            all => Value::Array(all.iter().map(StructuredError::to_json).collect()),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            writeln!(f, "Error #{:02}: {}", i + 1, err)?;
            if let Some(meta) = &err.meta {
                writeln!(f, "     Meta: {}", meta)?;
            }
        }
        Ok(())
    }
}

impl Serialize for ErrorList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a StructuredError;
    type IntoIter = std::slice::Iter<'a, StructuredError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
