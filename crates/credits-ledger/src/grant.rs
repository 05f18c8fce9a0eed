//! Credit grants and refunds.

use credits_core::{
    BalanceRecord, CreditTransaction, OrganizationId, Pool, TransactionType, UserId,
};
use credits_store::StoreTxn;

use crate::error::{LedgerError, Result};
use crate::ledger::CreditLedger;

/// A request to add credits to one pool.
#[derive(Debug, Clone)]
pub struct AddRequest {
    /// Credited organization.
    pub organization_id: OrganizationId,
    /// Credits to add.
    pub amount: i64,
    /// Target pool.
    pub pool: Pool,
    /// How the entry is classified in the log.
    pub transaction_type: TransactionType,
    /// Human-readable description.
    pub description: String,
    /// Additional context.
    pub metadata: serde_json::Value,
    /// Acting user.
    pub user_id: Option<UserId>,
    /// Causing entity as `(type, id)`.
    pub reference: Option<(String, String)>,
}

impl AddRequest {
    /// Create a grant whose type follows from the pool.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        amount: i64,
        pool: Pool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            organization_id,
            amount,
            pool,
            transaction_type: TransactionType::for_grant(pool),
            description: description.into(),
            metadata: serde_json::Value::Null,
            user_id: None,
            reference: None,
        }
    }

    /// Classify the entry explicitly (admin adjustment, rollover, refund, ...).
    #[must_use]
    pub fn with_type(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_type = transaction_type;
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Set the causing entity.
    #[must_use]
    pub fn with_reference(
        mut self,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        self.reference = Some((reference_type.into(), reference_id.into()));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.organization_id.is_nil() {
            return Err(LedgerError::InvalidParameters(
                "organization id is required".into(),
            ));
        }
        if self.amount <= 0 {
            return Err(LedgerError::InvalidParameters(
                "amount must be greater than zero".into(),
            ));
        }
        if self.transaction_type.is_debit() {
            return Err(LedgerError::InvalidParameters(format!(
                "{} cannot be used for a grant",
                self.transaction_type
            )));
        }
        Ok(())
    }
}

impl CreditLedger {
    /// Add credits to a pool. The log type follows from the pool.
    ///
    /// # Errors
    ///
    /// See [`CreditLedger::add_with`].
    pub fn add(
        &self,
        organization_id: &OrganizationId,
        amount: i64,
        pool: Pool,
        description: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<CreditTransaction> {
        self.add_with(
            AddRequest::new(*organization_id, amount, pool, description)
                .with_metadata(metadata.unwrap_or_default()),
        )
    }

    /// Add credits under the balance lock, creating a zero row if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` for a nil organization, a non-positive
    /// amount or a debit type; `StorageUnavailable` if the store is down.
    pub fn add_with(&self, request: AddRequest) -> Result<CreditTransaction> {
        request.validate()?;

        let mut txn = self.store.begin()?;
        let entry = grant_in(txn.as_mut(), &request)?;
        txn.commit()?;

        tracing::info!(
            organization_id = %request.organization_id,
            pool = %request.pool,
            transaction_type = %request.transaction_type,
            credits = request.amount,
            balance_after = entry.balance_after,
            "Credits added"
        );

        Ok(entry)
    }

    /// Return credits to the bonus pool.
    ///
    /// Refunds never reverse the original pool, whose cycle may have ended.
    ///
    /// # Errors
    ///
    /// Same as [`CreditLedger::add_with`].
    pub fn refund(
        &self,
        organization_id: &OrganizationId,
        amount: i64,
        reason: &str,
    ) -> Result<CreditTransaction> {
        self.add_with(
            AddRequest::new(*organization_id, amount, Pool::Bonus, format!("Refund: {reason}"))
                .with_type(TransactionType::Refund),
        )
    }
}

/// Credit a pool inside `txn` and append the matching log entry.
pub(crate) fn grant_in(
    txn: &mut (dyn StoreTxn + '_),
    request: &AddRequest,
) -> Result<CreditTransaction> {
    let organization_id = &request.organization_id;

    let mut record = match txn.lock_balance(organization_id)? {
        Some(record) => record,
        None => {
            let record = BalanceRecord::new(*organization_id, 0, None, None);
            txn.insert_balance(&record)?;
            record
        }
    };

    let before = record.total();
    record.credit(request.pool, request.amount)?;
    txn.put_balance(&record)?;

    let mut entry = CreditTransaction::new(
        *organization_id,
        request.transaction_type,
        request.pool,
        request.amount,
        before,
        request.description.clone(),
    )
    .with_user(request.user_id)
    .with_metadata(request.metadata.clone());

    if let Some((reference_type, reference_id)) = &request.reference {
        entry = entry.with_reference(reference_type.clone(), reference_id.clone());
    }

    txn.append_transaction(&entry)?;
    Ok(entry)
}
