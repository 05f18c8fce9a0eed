//! Purchase reconciliation.
//!
//! A confirmed payment becomes purchased credits exactly once per payment
//! reference. The lookup, the purchase write and the grant share one store
//! transaction that holds the reference lock, so a duplicate delivery racing
//! the first one waits and then sees the completed purchase.

use serde_json::json;

use credits_core::{OrganizationId, Pool, Purchase, PurchaseStatus};

use crate::error::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::grant::{grant_in, AddRequest};
use crate::ledger::CreditLedger;

/// A confirmed payment to convert into credits.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    /// Paying organization.
    pub organization_id: OrganizationId,
    /// Credits to grant.
    pub credits: i64,
    /// External payment identifier; the idempotency key.
    pub payment_reference: String,
    /// Amount paid in the smallest currency unit.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Pack bought, when known.
    pub pack_id: Option<String>,
}

impl PurchaseRequest {
    /// Create a request without payment details.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        credits: i64,
        payment_reference: impl Into<String>,
    ) -> Self {
        Self {
            organization_id,
            credits,
            payment_reference: payment_reference.into(),
            amount_cents: 0,
            currency: "usd".to_string(),
            pack_id: None,
        }
    }

    /// Record the amount paid.
    #[must_use]
    pub fn with_payment(mut self, amount_cents: i64, currency: impl Into<String>) -> Self {
        self.amount_cents = amount_cents;
        self.currency = currency.into().to_lowercase();
        self
    }

    /// Record the pack bought.
    #[must_use]
    pub fn with_pack(mut self, pack_id: Option<String>) -> Self {
        self.pack_id = pack_id;
        self
    }
}

/// Result of reconciling a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Credits were granted by this call.
    Completed(Purchase),
    /// The reference was already reconciled; nothing was granted.
    AlreadyProcessed(Purchase),
}

impl PurchaseOutcome {
    /// The purchase row.
    #[must_use]
    pub const fn purchase(&self) -> &Purchase {
        match self {
            Self::Completed(purchase) | Self::AlreadyProcessed(purchase) => purchase,
        }
    }

    /// Whether this call granted the credits.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

impl CreditLedger {
    /// Grant purchased credits for a payment, once per reference.
    ///
    /// # Errors
    ///
    /// See [`CreditLedger::complete_purchase_with`].
    pub fn complete_purchase(
        &self,
        organization_id: &OrganizationId,
        credits: i64,
        payment_reference: &str,
    ) -> Result<PurchaseOutcome> {
        self.complete_purchase_with(PurchaseRequest::new(
            *organization_id,
            credits,
            payment_reference,
        ))
    }

    /// Grant purchased credits for a payment, once per reference.
    ///
    /// A pending purchase recorded earlier for the same reference is
    /// completed with its recorded amount; any other existing purchase is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` when a pending purchase belongs to another
    /// organization, `BalanceOverflow` when the grant does not fit, other
    /// validation errors for bad arguments, and `StorageUnavailable`
    /// when the store cannot be reached, so the payment can be replayed.
    pub fn complete_purchase_with(&self, request: PurchaseRequest) -> Result<PurchaseOutcome> {
        if request.organization_id.is_nil() {
            return Err(LedgerError::InvalidOrganization);
        }
        if request.credits <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if request.payment_reference.trim().is_empty() {
            return Err(LedgerError::InvalidParameters(
                "payment reference is required".into(),
            ));
        }

        let mut txn = self.store.begin()?;

        let purchase = match txn.lock_purchase(&request.payment_reference)? {
            Some(existing) if existing.status != PurchaseStatus::Pending => {
                tracing::info!(
                    organization_id = %existing.organization_id,
                    payment_reference = %request.payment_reference,
                    status = %existing.status,
                    "Purchase already processed"
                );
                return Ok(PurchaseOutcome::AlreadyProcessed(existing));
            }
            Some(mut pending) => {
                if pending.organization_id != request.organization_id {
                    tracing::warn!(
                        organization_id = %request.organization_id,
                        owner = %pending.organization_id,
                        payment_reference = %request.payment_reference,
                        "Confirmation names another organization than the pending purchase"
                    );
                    return Err(LedgerError::InvalidParameters(format!(
                        "payment reference {} belongs to another organization",
                        request.payment_reference
                    )));
                }
                if pending.credits != request.credits {
                    tracing::warn!(
                        organization_id = %pending.organization_id,
                        payment_reference = %request.payment_reference,
                        pending_credits = pending.credits,
                        confirmed_credits = request.credits,
                        "Confirmed credits differ from the pending purchase, granting the pending amount"
                    );
                }
                pending.transition(PurchaseStatus::Completed)?;
                pending
            }
            None => {
                let mut purchase = Purchase::new(
                    request.organization_id,
                    request.credits,
                    request.payment_reference.clone(),
                    PurchaseStatus::Completed,
                );
                purchase.amount_cents = request.amount_cents;
                purchase.currency.clone_from(&request.currency);
                purchase.pack_id.clone_from(&request.pack_id);
                purchase
            }
        };

        txn.put_purchase(&purchase)?;

        let grant = AddRequest::new(
            purchase.organization_id,
            purchase.credits,
            Pool::Purchased,
            "Credit pack purchase",
        )
        .with_reference("payment", purchase.payment_reference.clone())
        .with_metadata(json!({
            "purchase_id": purchase.id.to_string(),
            "pack_id": purchase.pack_id,
            "amount_cents": purchase.amount_cents,
            "currency": purchase.currency,
        }));
        let entry = grant_in(txn.as_mut(), &grant)?;

        txn.commit()?;

        tracing::info!(
            organization_id = %purchase.organization_id,
            payment_reference = %purchase.payment_reference,
            credits = purchase.credits,
            balance_after = entry.balance_after,
            "Purchase completed"
        );

        self.publish(LedgerEvent::PurchaseCompleted(purchase.clone()));
        Ok(PurchaseOutcome::Completed(purchase))
    }

    /// Mark a completed purchase as refunded.
    ///
    /// Only the status changes; granted credits stay in the purchased pool.
    ///
    /// # Errors
    ///
    /// Returns `PurchaseNotFound` for an unknown reference and
    /// `InvalidPurchaseTransition` unless the purchase is completed.
    pub fn refund_purchase(&self, payment_reference: &str) -> Result<Purchase> {
        let mut txn = self.store.begin()?;

        let mut purchase = txn
            .lock_purchase(payment_reference)?
            .ok_or_else(|| LedgerError::PurchaseNotFound(payment_reference.to_string()))?;
        purchase.transition(PurchaseStatus::Refunded)?;

        txn.put_purchase(&purchase)?;
        txn.commit()?;

        tracing::info!(
            organization_id = %purchase.organization_id,
            payment_reference,
            "Purchase refunded"
        );
        Ok(purchase)
    }

    /// Record a failed payment.
    ///
    /// An unknown reference is stored as a new failed purchase; an existing
    /// one must still be pending.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPurchaseTransition` if the existing purchase is not
    /// pending, or a storage error.
    pub fn fail_purchase(
        &self,
        organization_id: &OrganizationId,
        credits: i64,
        payment_reference: &str,
    ) -> Result<Purchase> {
        if organization_id.is_nil() {
            return Err(LedgerError::InvalidOrganization);
        }

        let mut txn = self.store.begin()?;

        let mut purchase = txn.lock_purchase(payment_reference)?.unwrap_or_else(|| {
            Purchase::new(
                *organization_id,
                credits,
                payment_reference,
                PurchaseStatus::Pending,
            )
        });
        purchase.transition(PurchaseStatus::Failed)?;

        txn.put_purchase(&purchase)?;
        txn.commit()?;

        tracing::warn!(
            organization_id = %purchase.organization_id,
            payment_reference,
            "Purchase failed"
        );
        Ok(purchase)
    }

    /// Record a checkout that has not been paid yet.
    ///
    /// Returns the existing purchase unchanged if the reference is known.
    ///
    /// # Errors
    ///
    /// Returns validation errors for bad arguments, or a storage error.
    pub fn record_pending_purchase(&self, request: PurchaseRequest) -> Result<Purchase> {
        if request.organization_id.is_nil() {
            return Err(LedgerError::InvalidOrganization);
        }
        if request.credits <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut txn = self.store.begin()?;
        if let Some(existing) = txn.lock_purchase(&request.payment_reference)? {
            return Ok(existing);
        }

        let mut purchase = Purchase::new(
            request.organization_id,
            request.credits,
            request.payment_reference,
            PurchaseStatus::Pending,
        );
        purchase.amount_cents = request.amount_cents;
        purchase.currency = request.currency;
        purchase.pack_id = request.pack_id;

        txn.put_purchase(&purchase)?;
        txn.commit()?;

        tracing::debug!(
            organization_id = %purchase.organization_id,
            payment_reference = %purchase.payment_reference,
            "Pending purchase recorded"
        );
        Ok(purchase)
    }

    /// An organization's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn purchases(&self, organization_id: &OrganizationId) -> Result<Vec<Purchase>> {
        Ok(self.store.list_purchases(organization_id)?)
    }
}
