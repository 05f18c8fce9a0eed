//! Invoices for completed credit pack purchases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{InvoiceId, OrganizationId, Purchase};

/// A receipt generated after a purchase grant commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: InvoiceId,
    /// Human-facing number, `INV-YYYYMMDD-XXXXXXXX`.
    pub number: String,
    /// Billed organization.
    pub organization_id: OrganizationId,
    /// Payment the invoice documents.
    pub payment_reference: String,
    /// Credits granted.
    pub credits: i64,
    /// Amount paid in the smallest currency unit.
    pub amount_cents: i64,
    /// ISO currency code, lowercase.
    pub currency: String,
    /// When the invoice was issued.
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Issue an invoice for a completed purchase.
    #[must_use]
    pub fn for_purchase(purchase: &Purchase) -> Self {
        let id = InvoiceId::generate();
        let now = Utc::now();
        let id_str = id.to_string();
        let suffix = &id_str[id_str.len() - 8..];

        Self {
            id,
            number: format!("INV-{}-{suffix}", now.format("%Y%m%d")),
            organization_id: purchase.organization_id,
            payment_reference: purchase.payment_reference.clone(),
            credits: purchase.credits,
            amount_cents: purchase.amount_cents,
            currency: purchase.currency.clone(),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OrganizationId, PurchaseStatus};

    #[test]
    fn invoice_copies_purchase_details() {
        let mut purchase = Purchase::new(
            OrganizationId::generate(),
            500,
            "cs_test_abc",
            PurchaseStatus::Completed,
        );
        purchase.amount_cents = 4500;

        let invoice = Invoice::for_purchase(&purchase);
        assert_eq!(invoice.credits, 500);
        assert_eq!(invoice.amount_cents, 4500);
        assert_eq!(invoice.payment_reference, "cs_test_abc");
        assert!(invoice.number.starts_with("INV-"));
        assert_eq!(invoice.number.len(), "INV-20260101-".len() + 8);
    }
}
