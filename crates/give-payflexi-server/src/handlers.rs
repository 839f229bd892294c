//! HTTP Handlers

use axum::{
    Form, Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use give_payflexi::{
    CallbackAction, DonationRequest, GatewayDescriptor, PaymentError, Reference,
    webhook::SIGNATURE_HEADER,
};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub mode: &'static str,
    pub payflexi_configured: bool,
    pub last_webhook_at: Option<DateTime<Utc>>,
}

/// Query string of the donor redirect coming back from PayFlexi
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(rename = "payflexi-give-api")]
    pub api: Option<String>,
    pub reference: Option<String>,
    pub pf_approved: Option<String>,
    pub pf_cancelled: Option<String>,
    pub pf_declined: Option<String>,
}

impl CallbackParams {
    /// Cancelled wins over declined, declined over approved
    fn action(&self) -> Option<CallbackAction> {
        if self.pf_cancelled.is_some() {
            Some(CallbackAction::Cancelled)
        } else if self.pf_declined.is_some() {
            Some(CallbackAction::Declined)
        } else if self.pf_approved.is_some() {
            Some(CallbackAction::Approved)
        } else {
            None
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        mode: state.config.mode.as_str(),
        payflexi_configured: state.engine.is_some(),
        last_webhook_at: state.webhooks.as_ref().and_then(|w| w.last_received()),
    })
}

/// Payment methods offered on the donation form
pub async fn list_gateways(State(state): State<AppState>) -> Json<Vec<GatewayDescriptor>> {
    Json(vec![state.descriptor.as_ref().clone()])
}

/// Donation form submission: create the donation, send the donor to PayFlexi
pub async fn create_donation(
    State(state): State<AppState>,
    Form(payload): Form<DonationRequest>,
) -> Redirect {
    let form_id = payload.form_id;

    let Some(engine) = state.engine.as_ref() else {
        let err = PaymentError::Config("PayFlexi keys are not configured".into());
        return Redirect::to(state.redirects.back_to_checkout(form_id, &err).as_str());
    };

    match engine.initiate_payment(payload).await {
        Ok(initiation) => Redirect::to(&initiation.checkout_url),
        Err(e) => {
            tracing::warn!(form_id, error = %e, "Sending donor back to checkout");
            Redirect::to(state.redirects.back_to_checkout(form_id, &e).as_str())
        }
    }
}

/// Donor redirect from the hosted checkout (`?payflexi-give-api=verify`)
pub async fn payflexi_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    // Only `?payflexi-give-api=verify` belongs to us
    if !params
        .api
        .as_deref()
        .is_some_and(|api| api.trim().eq_ignore_ascii_case("verify"))
    {
        return StatusCode::NOT_FOUND.into_response();
    }

    let failed = || Redirect::to(state.redirects.failure_page().as_str()).into_response();

    let Some(engine) = state.engine.as_ref() else {
        tracing::warn!("PayFlexi callback received but gateway is not configured");
        return failed();
    };

    let Some(reference) = params
        .reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(Reference::from_string)
    else {
        tracing::warn!("PayFlexi callback without reference");
        return failed();
    };

    let Some(action) = params.action() else {
        tracing::warn!(reference = %reference, "PayFlexi callback without outcome flag");
        return failed();
    };

    let outcome = engine.reconcile(&reference, action).await;
    match &outcome {
        Ok(outcome) => {
            tracing::info!(reference = %reference, ?action, ?outcome, "Donor callback reconciled");
        }
        Err(e) => {
            tracing::error!(reference = %reference, ?action, error = %e, "Donor callback failed");
        }
    }

    Redirect::to(state.redirects.for_outcome(&outcome).as_str()).into_response()
}

/// PayFlexi webhook
pub async fn payflexi_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let Some(webhooks) = state.webhooks.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Payments not configured".into(),
        );
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let ack = webhooks.handle(signature, &body).await;
    let status = StatusCode::from_u16(ack.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, ack.body().to_string())
}
