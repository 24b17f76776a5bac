use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Unavailable,
    Rejected,
    Timeout,
    Internal,
}

/// A single document that could not be turned into a typed entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("document {document_id} is not a JSON object")]
    NotAnObject { document_id: String },
    #[error("document {document_id} is missing required field `{field}`")]
    MissingField {
        document_id: String,
        field: &'static str,
    },
    #[error("document {document_id} has unknown message kind `{raw}`")]
    UnknownKind { document_id: String, raw: String },
    #[error("document {document_id} is malformed: {reason}")]
    Malformed { document_id: String, reason: String },
}

impl DecodeError {
    pub fn document_id(&self) -> &str {
        match self {
            DecodeError::NotAnObject { document_id }
            | DecodeError::MissingField { document_id, .. }
            | DecodeError::UnknownKind { document_id, .. }
            | DecodeError::Malformed { document_id, .. } => document_id,
        }
    }
}

/// Failure reported by the remote document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct StoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }
}
