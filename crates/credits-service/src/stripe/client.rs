//! Stripe API client implementation.

use std::time::Duration;

use reqwest::Client;

use credits_core::{CreditPack, OrganizationId};

use super::types::{CheckoutSession, StripeErrorResponse, StripeList};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid webhook signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Webhook signature timestamp outside the tolerance window.
    #[error("Webhook signature timestamp is too old")]
    StaleSignature,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// What to sell in a Checkout session.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutParams<'a> {
    /// Buying organization (`client_reference_id`).
    pub organization_id: &'a OrganizationId,
    /// Pack being bought.
    pub pack: &'a CreditPack,
    /// URL to redirect on success.
    pub success_url: &'a str,
    /// URL to redirect on cancel.
    pub cancel_url: &'a str,
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `base_url` - API base, normally `https://api.stripe.com/v1`
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a Checkout session for a credit pack.
    ///
    /// The organization, pack and credits are written to the session metadata
    /// so the completion webhook can reconcile the payment without any other
    /// lookup.
    pub async fn create_checkout_session(
        &self,
        params: CheckoutParams<'_>,
    ) -> Result<CheckoutSession, StripeError> {
        let organization_id = params.organization_id.to_string();
        let pack = params.pack;

        let form = [
            ("mode", "payment".to_string()),
            ("success_url", params.success_url.to_string()),
            ("cancel_url", params.cancel_url.to_string()),
            ("client_reference_id", organization_id.clone()),
            ("line_items[0][price_data][currency]", pack.currency.clone()),
            (
                "line_items[0][price_data][product_data][name]",
                pack.name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                format!("{} credits", pack.credits),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                pack.price_cents.to_string(),
            ),
            ("line_items[0][quantity]", "1".to_string()),
            ("metadata[organization_id]", organization_id.clone()),
            ("metadata[pack_id]", pack.id.clone()),
            ("metadata[credits]", pack.credits.to_string()),
            (
                "payment_intent_data[metadata][organization_id]",
                organization_id,
            ),
        ];

        tracing::debug!(
            organization_id = %params.organization_id,
            pack_id = %pack.id,
            amount_cents = pack.price_cents,
            "Creating Stripe checkout session"
        );

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&form)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Retrieve a Checkout session by ID.
    pub async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, StripeError> {
        let response = self
            .client
            .get(format!("{}/checkout/sessions/{}", self.base_url, session_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Find the Checkout session that created a payment intent.
    pub async fn find_checkout_session(
        &self,
        payment_intent: &str,
    ) -> Result<Option<CheckoutSession>, StripeError> {
        let response = self
            .client
            .get(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[("payment_intent", payment_intent), ("limit", "1")])
            .send()
            .await?;

        let list: StripeList<CheckoutSession> = self.handle_response(response).await?;
        Ok(list.data.into_iter().next())
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = StripeClient::new("sk_test_xxx", "http://localhost:1234/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:1234/v1");
    }
}
