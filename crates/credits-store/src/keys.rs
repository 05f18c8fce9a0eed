//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding keys used in column families.
//! Organization-scoped keys start with the 16 UUID bytes so that a prefix
//! scan returns one organization's rows.

use credits_core::OrganizationId;

/// Length of an organization-scoped key: `organization_id (16) || ulid (16)`.
pub const SCOPED_KEY_LEN: usize = 32;

/// Create a balance or organization key from an organization ID.
#[must_use]
pub fn organization_key(organization_id: &OrganizationId) -> Vec<u8> {
    organization_id.as_bytes().to_vec()
}

/// Create an organization-scoped key for a time-ordered record.
///
/// Format: `organization_id (16 bytes) || ulid (16 bytes)`
#[must_use]
pub fn scoped_key(organization_id: &OrganizationId, ulid_bytes: [u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(SCOPED_KEY_LEN);
    key.extend_from_slice(organization_id.as_bytes());
    key.extend_from_slice(&ulid_bytes);
    key
}

/// Create a prefix for iterating all records of an organization.
#[must_use]
pub fn organization_prefix(organization_id: &OrganizationId) -> Vec<u8> {
    organization_id.as_bytes().to_vec()
}

/// Create a purchase key from a payment reference.
#[must_use]
pub fn purchase_key(payment_reference: &str) -> Vec<u8> {
    payment_reference.as_bytes().to_vec()
}

/// Create a processed-event key from an idempotency key.
#[must_use]
pub fn event_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}
