//! Payment processor client
//!
//! Wraps the Stripe API for the one operation the renewal job needs:
//! creating a recurring subscription against a stored customer and payment
//! method. Any charge failure — decline, processor outage, rate limit — is
//! an expected business outcome ([`RenewalOutcome::Declined`]), never an
//! error: the caller downgrades deterministically and the row is not left
//! open past its period.

use serde::Serialize;
use stripe::{
    CreateSubscription, CreateSubscriptionItems, CustomerId, Subscription,
    SubscriptionPaymentBehavior,
};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// Outcome of a renewal charge attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RenewalOutcome {
    /// The processor accepted the charge and now owns the renewal cycle
    Renewed {
        external_subscription_id: String,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    },
    /// Declined, charge attempt failed, or the processor is not configured;
    /// the caller takes the downgrade path
    Declined { reason: String },
}

#[derive(Clone)]
pub struct ProcessorClient {
    client: Option<stripe::Client>,
}

impl ProcessorClient {
    /// Build from `STRIPE_SECRET_KEY`; runs in disabled mode when unset
    pub fn from_env() -> Self {
        match std::env::var("STRIPE_SECRET_KEY") {
            Ok(key) if !key.is_empty() => {
                tracing::info!("Payment processor client initialized");
                Self {
                    client: Some(stripe::Client::new(key)),
                }
            }
            _ => {
                tracing::warn!(
                    "STRIPE_SECRET_KEY not set - renewals will fall through to downgrade"
                );
                Self { client: None }
            }
        }
    }

    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Some(stripe::Client::new(secret_key.to_string())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Attempt one recurring charge for `price_ref` against the stored
    /// customer and payment method.
    ///
    /// Every processor failure maps to `Ok(Declined)`. `Err` is reserved for
    /// inconsistencies after a successful charge (unparseable period bounds),
    /// where a downgrade would orphan money already taken.
    pub async fn create_renewal(
        &self,
        customer_ref: &str,
        payment_method: &str,
        price_ref: &str,
    ) -> BillingResult<RenewalOutcome> {
        let Some(client) = &self.client else {
            return Ok(RenewalOutcome::Declined {
                reason: "payment processor not configured".to_string(),
            });
        };

        let customer_id = match customer_ref.parse::<CustomerId>() {
            Ok(id) => id,
            // A corrupt stored reference can never charge; same path as a
            // missing payment method.
            Err(e) => {
                return Ok(RenewalOutcome::Declined {
                    reason: format!("invalid customer reference: {}", e),
                })
            }
        };

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_ref.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.default_payment_method = Some(payment_method);
        // Fail the create outright instead of leaving an incomplete
        // subscription behind when the charge does not go through.
        params.payment_behavior = Some(SubscriptionPaymentBehavior::ErrorIfIncomplete);

        match Subscription::create(client, params).await {
            Ok(subscription) => {
                let period_start =
                    OffsetDateTime::from_unix_timestamp(subscription.current_period_start)
                        .map_err(|e| {
                            BillingError::Internal(format!("bad period start from processor: {}", e))
                        })?;
                let period_end =
                    OffsetDateTime::from_unix_timestamp(subscription.current_period_end).map_err(
                        |e| {
                            BillingError::Internal(format!("bad period end from processor: {}", e))
                        },
                    )?;

                Ok(RenewalOutcome::Renewed {
                    external_subscription_id: subscription.id.to_string(),
                    period_start,
                    period_end,
                })
            }
            Err(e) => {
                tracing::warn!(
                    customer_ref = %customer_ref,
                    error = %e,
                    "Renewal charge failed"
                );
                Ok(charge_failure(e))
            }
        }
    }
}

/// Map a failed charge attempt onto the downgrade path.
///
/// The reason is extracted structurally, not by matching message wording:
/// a `RequestError` carries the processor's own message and decline code,
/// everything else (timeout, transport, serialization) falls back to the
/// error's display form.
fn charge_failure(e: stripe::StripeError) -> RenewalOutcome {
    let reason = match &e {
        stripe::StripeError::Stripe(request_error) => {
            let message = request_error
                .message
                .clone()
                .unwrap_or_else(|| format!("processor error (HTTP {})", request_error.http_status));
            match &request_error.decline_code {
                Some(decline_code) => format!("{} [{}]", message, decline_code),
                None => message,
            }
        }
        other => other.to_string(),
    };

    RenewalOutcome::Declined { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_downgrade_outcome_not_an_error() {
        let outcome = charge_failure(stripe::StripeError::Timeout);
        assert!(matches!(outcome, RenewalOutcome::Declined { .. }));
    }

    #[test]
    fn transport_errors_carry_their_reason_into_the_decline() {
        let outcome =
            charge_failure(stripe::StripeError::ClientError("rate limit exceeded".into()));
        let RenewalOutcome::Declined { reason } = outcome else {
            panic!("transport failure must map to the downgrade path");
        };
        assert!(reason.contains("rate limit exceeded"));
    }

    #[tokio::test]
    async fn disabled_client_reports_decline_not_error() {
        let client = ProcessorClient { client: None };
        let outcome = client
            .create_renewal("cus_123", "pm_123", "price_123")
            .await
            .unwrap();
        assert!(matches!(outcome, RenewalOutcome::Declined { .. }));
    }

    #[tokio::test]
    async fn corrupt_customer_reference_is_declined_not_errored() {
        let client = ProcessorClient::new("sk_test_dummy");
        let outcome = client
            .create_renewal("not a customer id", "pm_123", "price_123")
            .await
            .unwrap();
        assert!(matches!(outcome, RenewalOutcome::Declined { .. }));
    }
}
