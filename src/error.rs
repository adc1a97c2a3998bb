//! Crate-wide error union.
//!
//! Every fallible operation in the kernel surfaces one of the variants below.
//! The bracketed code at the front of each message is the stable surface name
//! clients match on; the rest of the message is diagnostic detail and may
//! change between releases.
//!
//! Storage-level failures (`kv::StorageError`) are converted into
//! [`KernelError::StorageFailure`] at the transaction façade, which closes the
//! transaction before the error surfaces.

use crate::kv::StorageError;

/// The closed error union for the kernel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    /// The transaction was already closed when the operation was attempted.
    #[error("[TRANSACTION_CLOSED] the transaction is closed")]
    TransactionClosed,

    /// The session was already closed when a transaction was requested.
    #[error("[SESSION_CLOSED] the session is closed")]
    SessionClosed,

    /// Commit was called on a READ transaction, or called twice.
    #[error("[ILLEGAL_COMMIT] commit is not legal on this transaction")]
    IllegalCommit,

    /// A schema transaction attempted to commit data-graph mutations.
    #[error("[SESSION_SCHEMA_VIOLATION] schema transactions may not modify the data graph")]
    SessionSchemaViolation,

    /// A data transaction attempted to commit schema-graph mutations.
    #[error("[SESSION_DATA_VIOLATION] data transactions may not modify the schema graph")]
    SessionDataViolation,

    /// A vertex was requested under an incompatible kind.
    #[error("[ILLEGAL_CAST] cannot treat '{actual}' as '{expected}'")]
    IllegalCast {
        /// The kind the caller asked for.
        expected: String,
        /// The kind actually recorded.
        actual: String,
    },

    /// A key was declared over an attribute type whose value type is not keyable.
    #[error("[INVALID_KEY_VALUE_TYPE] attribute '{label}' has value type '{value_type}', which cannot be used as a key")]
    InvalidKeyValueType {
        /// Label of the offending attribute type.
        label: String,
        /// Its value type.
        value_type: String,
    },

    /// An override names a target that is not a supertype of the declared target.
    #[error("[INVALID_OVERRIDE_NOT_SUPERTYPE] '{overridden}' is not a supertype of '{label}'")]
    InvalidOverrideNotSupertype {
        /// Label of the declared edge target.
        label: String,
        /// Label of the claimed overridden target.
        overridden: String,
    },

    /// An override names a target that is not visible from any ancestor.
    #[error("[INVALID_OVERRIDE_NOT_AVAILABLE] '{overridden}' is not inherited by '{label}' and cannot be overridden")]
    InvalidOverrideNotAvailable {
        /// Label of the type declaring the override.
        label: String,
        /// Label of the claimed overridden target.
        overridden: String,
    },

    /// A mutating operation was attempted on a root type.
    #[error("[INVALID_ROOT_TYPE_MUTATION] root type '{label}' may not be modified")]
    InvalidRootTypeMutation {
        /// Label of the root type.
        label: String,
    },

    /// An attribute or role already declared or inherited was re-declared
    /// without an override.
    #[error("[ALREADY_OWNED] '{target}' is already declared or inherited by '{label}'")]
    AlreadyOwned {
        /// Label of the declaring type.
        label: String,
        /// Label of the attribute or role type.
        target: String,
    },

    /// A supertype assignment that would create a subtyping cycle.
    #[error("[CYCLIC_SUPERTYPE] '{label}' cannot be a subtype of '{supertype}': subtyping would become cyclic")]
    CyclicSupertype {
        /// Label of the type being re-parented.
        label: String,
        /// Label of the proposed supertype.
        supertype: String,
    },

    /// A type with subtypes or instances was deleted.
    #[error("[TYPE_IN_USE] type '{label}' has subtypes or instances and cannot be deleted")]
    TypeInUse {
        /// Label of the type.
        label: String,
    },

    /// A label is already assigned to another type.
    #[error("[LABEL_TAKEN] label '{label}' is already in use")]
    LabelTaken {
        /// The contested label.
        label: String,
    },

    /// A type was looked up by a label that resolves to nothing.
    #[error("[TYPE_NOT_FOUND] no type with label '{label}'")]
    TypeNotFound {
        /// The unresolved label.
        label: String,
    },

    /// The underlying KV engine failed; the transaction has been closed.
    #[error("[STORAGE_FAILURE] {0}")]
    StorageFailure(#[from] StorageError),

    /// A kernel invariant was violated. Always a bug, never user error.
    #[error("[INTERNAL] {0}")]
    Internal(String),
}

impl KernelError {
    /// The stable surface code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransactionClosed => "TRANSACTION_CLOSED",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::IllegalCommit => "ILLEGAL_COMMIT",
            Self::SessionSchemaViolation => "SESSION_SCHEMA_VIOLATION",
            Self::SessionDataViolation => "SESSION_DATA_VIOLATION",
            Self::IllegalCast { .. } => "ILLEGAL_CAST",
            Self::InvalidKeyValueType { .. } => "INVALID_KEY_VALUE_TYPE",
            Self::InvalidOverrideNotSupertype { .. } => "INVALID_OVERRIDE_NOT_SUPERTYPE",
            Self::InvalidOverrideNotAvailable { .. } => "INVALID_OVERRIDE_NOT_AVAILABLE",
            Self::InvalidRootTypeMutation { .. } => "INVALID_ROOT_TYPE_MUTATION",
            Self::AlreadyOwned { .. } => "ALREADY_OWNED",
            Self::CyclicSupertype { .. } => "CYCLIC_SUPERTYPE",
            Self::TypeInUse { .. } => "TYPE_IN_USE",
            Self::LabelTaken { .. } => "LABEL_TAKEN",
            Self::TypeNotFound { .. } => "TYPE_NOT_FOUND",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Build an internal invariant-violation error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_leads_message() {
        let err = KernelError::TransactionClosed;
        assert!(err.to_string().starts_with("[TRANSACTION_CLOSED]"));
        assert_eq!(err.code(), "TRANSACTION_CLOSED");
    }

    #[test]
    fn test_storage_failure_from_storage_error() {
        let err: KernelError = StorageError::Conflict.into();
        assert_eq!(err.code(), "STORAGE_FAILURE");
    }
}
