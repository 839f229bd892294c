//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// PayFlexi integration errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Missing or malformed merchant configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Gateway did not answer in time or answered with a non-success status
    #[error("PayFlexi unavailable: {0}")]
    GatewayUnavailable(String),

    /// Gateway answered but flagged the request as errored
    #[error("PayFlexi error: {0}")]
    Gateway(String),

    /// Gateway answered 200 with a body we could not understand
    #[error("Invalid PayFlexi response: {0}")]
    InvalidResponse(String),

    /// No donation matches the reference
    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    /// Webhook signature did not match the payload
    #[error("Webhook signature mismatch")]
    SignatureMismatch,

    /// Authenticated webhook payload could not be parsed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Authenticated webhook carried an event we do not handle
    #[error("Unsupported webhook event: {0}")]
    UnsupportedEvent(String),

    /// Donation request rejected before anything was stored
    #[error("Invalid donation: {0}")]
    InvalidDonation(String),

    /// Donation store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::GatewayUnavailable(_) | PaymentError::InvalidResponse(_) => {
                "We could not reach the payment provider. Please try again."
            }
            PaymentError::Gateway(_) => "Payment processing failed. Please try again.",
            PaymentError::UnknownReference(_) => "This donation could not be found.",
            PaymentError::InvalidDonation(_) => "Please check the donation details and try again.",
            PaymentError::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your donation.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_gateway_payload() {
        let err = PaymentError::Gateway("{\"errors\":true,\"message\":\"raw\"}".into());
        assert!(!err.user_message().contains("raw"));
    }
}
