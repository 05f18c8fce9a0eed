//! Application state.

use std::sync::Arc;

use tokio::sync::mpsc;

use credits_ledger::{CreditLedger, StorePlanLookup};
use credits_store::Store;

use crate::config::ServiceConfig;
use crate::events;
use crate::stripe::StripeClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The credit ledger.
    pub ledger: Arc<CreditLedger>,

    /// The storage backend, for organization and reporting reads.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client for payments (optional).
    pub stripe: Option<Arc<StripeClient>>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Plans are read from the organizations table. When called inside a
    /// tokio runtime, the ledger event consumer is spawned on it.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        match tokio::runtime::Handle::try_current() {
            Ok(_) => {
                events::spawn_consumer(store.clone(), events_rx);
            }
            Err(_) => {
                tracing::warn!("No async runtime - ledger events will not be recorded");
            }
        }

        let ledger = CreditLedger::new(
            store.clone(),
            Arc::new(StorePlanLookup::new(store.clone())),
            config.ledger.clone(),
        )
        .with_events(Arc::new(events_tx));

        // Create Stripe client if configured
        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, config.stripe_api_base.clone()) {
                Ok(client) => {
                    tracing::info!("Stripe integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - checkout will not be available");
        }

        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - webhooks will be rejected");
        }

        Self {
            ledger: Arc::new(ledger),
            store,
            config,
            stripe,
        }
    }
}
