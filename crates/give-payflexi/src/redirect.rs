//! Donor Redirects

use reqwest::Url;

use crate::config::PayflexiConfig;
use crate::engine::ReconcileOutcome;
use crate::error::{PaymentError, Result};

/// Maps reconciliation results to the page the donor lands on
#[derive(Clone, Debug)]
pub struct RedirectDispatcher {
    success_page: Url,
    failure_page: Url,
    checkout_page: Url,
}

impl RedirectDispatcher {
    pub fn new(config: &PayflexiConfig) -> Result<Self> {
        Ok(Self {
            success_page: parse("success page", &config.success_page_url)?,
            failure_page: parse("failure page", &config.failure_page_url)?,
            checkout_page: parse("checkout page", &config.checkout_page_url)?,
        })
    }

    /// Success page for completed donations, failed-transaction page otherwise.
    /// Errors never reach the donor as payloads.
    pub fn for_outcome(&self, outcome: &Result<ReconcileOutcome>) -> &Url {
        match outcome {
            Ok(outcome) if outcome.is_success() => &self.success_page,
            _ => &self.failure_page,
        }
    }

    pub fn success_page(&self) -> &Url {
        &self.success_page
    }

    pub fn failure_page(&self) -> &Url {
        &self.failure_page
    }

    /// Send the donor back to the donation form after a failed initiation
    pub fn back_to_checkout(&self, form_id: u64, error: &PaymentError) -> Url {
        let mut url = self.checkout_page.clone();
        url.query_pairs_mut()
            .append_pair("payment-mode", "payflexi")
            .append_pair("form-id", &form_id.to_string())
            .append_pair("error", error.user_message());
        url
    }
}

fn parse(what: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| PaymentError::Config(format!("invalid {what} URL '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::donation::{DonationId, DonationStatus};

    fn dispatcher() -> RedirectDispatcher {
        RedirectDispatcher::new(&PayflexiConfig {
            success_page_url: "https://give.example.org/thanks".into(),
            failure_page_url: "https://give.example.org/failed".into(),
            checkout_page_url: "https://give.example.org/donate".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_success_outcomes() {
        let d = dispatcher();
        let completed = Ok(ReconcileOutcome::Completed {
            donation_id: DonationId(1),
            partial: true,
        });
        let already = Ok(ReconcileOutcome::AlreadyReconciled {
            donation_id: DonationId(1),
            status: DonationStatus::Complete,
        });

        assert_eq!(d.for_outcome(&completed).path(), "/thanks");
        assert_eq!(d.for_outcome(&already).path(), "/thanks");
    }

    #[test]
    fn test_everything_else_fails() {
        let d = dispatcher();
        let outcomes = [
            Ok(ReconcileOutcome::UnknownReference),
            Ok(ReconcileOutcome::Declined {
                donation_id: DonationId(1),
            }),
            Ok(ReconcileOutcome::AlreadyReconciled {
                donation_id: DonationId(1),
                status: DonationStatus::Cancelled,
            }),
            Err(PaymentError::GatewayUnavailable("timeout".into())),
        ];

        for outcome in &outcomes {
            assert_eq!(d.for_outcome(outcome).path(), "/failed");
        }
    }

    #[test]
    fn test_back_to_checkout() {
        let url = dispatcher().back_to_checkout(7, &PaymentError::Gateway("raw payload".into()));

        assert_eq!(url.path(), "/donate");
        let query = url.query().unwrap_or_default();
        assert!(query.contains("payment-mode=payflexi"));
        assert!(query.contains("form-id=7"));
        assert!(!query.contains("raw"));
    }

    #[test]
    fn test_rejects_bad_urls() {
        let result = RedirectDispatcher::new(&PayflexiConfig {
            success_page_url: "not a url".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(PaymentError::Config(_))));
    }
}
