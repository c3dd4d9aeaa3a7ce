use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single dynamically-typed attribute value.
///
/// Numbers travel as their decimal string, the way the store's wire format
/// carries them, so no precision is lost between caller and store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(Vec<u8>),
    SS(Vec<String>),
    NS(Vec<String>),
    BS(Vec<Vec<u8>>),
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::S(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::S(value.to_owned())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        AttributeValue::B(value)
    }
}

macro_rules! number_attribute {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    AttributeValue::N(value.to_string())
                }
            }
        )*
    };
}

number_attribute!(i32, i64, u32, u64, usize, f64);

/// Attribute name to value mapping.
///
/// Used both as a full write payload and as a key-only descriptor for deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, AttributeValue>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for literals.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    /// Projects the document down to the named attributes.
    ///
    /// Returns `None` when any of them is missing.
    pub fn project(&self, names: &[String]) -> Option<Document> {
        names
            .iter()
            .map(|name| self.0.get(name).map(|v| (name.clone(), v.clone())))
            .collect::<Option<BTreeMap<_, _>>>()
            .map(Document)
    }
}

impl FromIterator<(String, AttributeValue)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Document(iter.into_iter().collect())
    }
}

/// Error categories reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ThroughputExceeded,
    Throttling,
    ServiceUnavailable,
    InternalFailure,
    ConditionalCheckFailed,
    ResourceNotFound,
    Validation,
    /// Any other store error code, kept verbatim.
    Other(String),
}

impl ErrorKind {
    /// Maps a wire error code to its kind.
    ///
    /// Codes may arrive namespaced (`com.amazonaws.dynamodb.v20120810#ThrottlingException`);
    /// only the part after the last `#` is considered.
    pub fn from_code(code: &str) -> Self {
        let short = code.rsplit('#').next().unwrap_or(code);
        match short {
            "ProvisionedThroughputExceededException" | "RequestLimitExceeded" => {
                ErrorKind::ThroughputExceeded
            }
            "ThrottlingException" => ErrorKind::Throttling,
            "ServiceUnavailable" | "ServiceUnavailableException" => ErrorKind::ServiceUnavailable,
            "InternalFailure" | "InternalServerError" => ErrorKind::InternalFailure,
            "ConditionalCheckFailedException" => ErrorKind::ConditionalCheckFailed,
            "ResourceNotFoundException" => ErrorKind::ResourceNotFound,
            "ValidationException" => ErrorKind::Validation,
            other => ErrorKind::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ThroughputExceeded => f.write_str("throughput exceeded"),
            ErrorKind::Throttling => f.write_str("throttling"),
            ErrorKind::ServiceUnavailable => f.write_str("service unavailable"),
            ErrorKind::InternalFailure => f.write_str("internal failure"),
            ErrorKind::ConditionalCheckFailed => f.write_str("conditional check failed"),
            ErrorKind::ResourceNotFound => f.write_str("resource not found"),
            ErrorKind::Validation => f.write_str("validation error"),
            ErrorKind::Other(code) => f.write_str(code),
        }
    }
}

/// An error the store classified before returning it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors returned by a [`StoreClient`](super::StoreClient).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store answered with a classified error.
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    /// The request never produced a classified answer (network, signing, decoding).
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        StoreError::Classified(ClassifiedError::new(kind, message))
    }

    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Transport(err.into())
    }

    /// The classified detail, if the store provided one.
    pub fn as_classified(&self) -> Option<&ClassifiedError> {
        match self {
            StoreError::Classified(e) => Some(e),
            StoreError::Transport(_) => None,
        }
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        self.as_classified().map(|e| &e.kind)
    }
}

/// Items a batch call accepted but did not persist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unprocessed {
    pub writes: Vec<Document>,
    pub delete_keys: Vec<Document>,
}

impl Unprocessed {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.writes.len() + self.delete_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
