use thiserror::Error;

/// Errors raised while reading, typing, mutating or writing BCF records.
#[derive(Debug, Error)]
pub enum BcfError {
    /// The field id is not declared in the relevant INFO or FORMAT registry.
    #[error("field `{0}` is not declared in the header")]
    UnknownField(String),
    #[error("value for `{id}` does not match its declaration: {reason}")]
    TypeMismatch { id: String, reason: String },
    /// Stored bytes disagree with the declared type or cardinality.
    #[error("malformed value for `{id}`: {reason}")]
    MalformedField { id: String, reason: String },
    #[error("field `{0}` is already declared with a different definition")]
    DuplicateId(String),
    /// The translation target lacks (or retypes) something the record relies on.
    #[error("header is incompatible: {0}")]
    IncompatibleHeader(String),
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("filter `{0}` is not declared in the header")]
    UnknownFilter(String),
    #[error("contig `{0}` is not declared in the header")]
    UnknownContig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BcfError {
    pub(crate) fn mismatch(id: &str, reason: impl Into<String>) -> Self {
        BcfError::TypeMismatch {
            id: id.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(id: &str, reason: impl Into<String>) -> Self {
        BcfError::MalformedField {
            id: id.to_owned(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BcfError>;
