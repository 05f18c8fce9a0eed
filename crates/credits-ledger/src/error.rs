//! Error types for ledger operations.

use credits_store::StoreError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors returned by `CreditLedger`.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The organization identifier is missing or nil.
    #[error("invalid organization")]
    InvalidOrganization,

    /// The amount is zero or negative.
    #[error("amount must be greater than zero")]
    InvalidAmount,

    /// A grant was requested with invalid arguments.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The pools together hold less than the requested amount.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Credits requested.
        required: i64,
        /// Credits available across all pools.
        available: i64,
    },

    /// No balance row exists even after lazy initialization.
    #[error("balance could not be initialized")]
    BalanceInitializationFailed,

    /// The guarded decrement found a pool short of its share.
    #[error("balance changed during deduction")]
    DeductionFailed,

    /// Any other failure while a deduction was in flight. Nothing was applied.
    #[error("deduction error: {0}")]
    Deduction(#[source] StoreError),

    /// The credit tables cannot be reached.
    #[error("credit storage unavailable")]
    StorageUnavailable,

    /// Waiting for a row lock exceeded the configured timeout.
    #[error("timed out waiting for balance lock")]
    LockTimeout,

    /// A grant would push the balance past the largest representable total.
    #[error("credit would overflow the balance")]
    BalanceOverflow,

    /// The organization is not registered.
    #[error("organization not found: {0}")]
    OrganizationNotFound(String),

    /// No purchase exists for the payment reference.
    #[error("purchase not found: {0}")]
    PurchaseNotFound(String),

    /// The purchase lifecycle does not allow the requested change.
    #[error("invalid purchase transition from {from} to {to}")]
    InvalidPurchaseTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Storage error outside a deduction.
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

impl LedgerError {
    /// Whether the caller may retry the same request.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DeductionFailed | Self::LockTimeout | Self::StorageUnavailable
        )
    }

    /// Map a store error raised inside a deduction.
    pub(crate) fn deduction(error: StoreError) -> Self {
        match error {
            StoreError::LockTimeout => Self::LockTimeout,
            other => Self::Deduction(other),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable => Self::StorageUnavailable,
            StoreError::LockTimeout => Self::LockTimeout,
            other => Self::Storage(other),
        }
    }
}

impl From<credits_core::BalanceOverflow> for LedgerError {
    fn from(_: credits_core::BalanceOverflow) -> Self {
        Self::BalanceOverflow
    }
}

impl From<credits_core::TransitionError> for LedgerError {
    fn from(error: credits_core::TransitionError) -> Self {
        Self::InvalidPurchaseTransition {
            from: error.from,
            to: error.to,
        }
    }
}
