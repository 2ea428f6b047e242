//! The stable error taxonomy shared by every component.
//!
//! Every error that can reach a caller — HTTP response, client-engine
//! return value, or callback invocation — is representable as an
//! [`IvxpError`]: a stable SCREAMING_SNAKE_CASE `code`, a human `message`,
//! optional structured `details`, and an optional boxed `cause` so chains
//! (`Error -> IvxpError -> IvxpError...`) survive serialization.

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation
    InvalidRequest,
    InvalidSignedMessage,
    InvalidTxHash,
    InvalidNumericString,
    InvalidPollOptions,
    InvalidProviderConfig,
    InvalidPrivateKey,
    // Protocol state
    OrderNotFound,
    OrderExpired,
    InvalidOrderStatus,
    NetworkMismatch,
    ServiceNotFound,
    // Payment
    InsufficientBalance,
    TransactionSubmissionFailed,
    TransactionFailed,
    PaymentNotFound,
    PaymentPending,
    PaymentFailed,
    PaymentAmountMismatch,
    PaymentNotVerified,
    // Crypto
    SignatureInvalid,
    SignatureVerificationFailed,
    // Delivery
    ContentHashMismatch,
    MaxPollAttempts,
    // Recovery
    PartialSuccess,
    // Infra
    ServiceUnavailable,
    Timeout,
    BudgetExceeded,
    ProviderError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidSignedMessage => "INVALID_SIGNED_MESSAGE",
            ErrorCode::InvalidTxHash => "INVALID_TX_HASH",
            ErrorCode::InvalidNumericString => "INVALID_NUMERIC_STRING",
            ErrorCode::InvalidPollOptions => "INVALID_POLL_OPTIONS",
            ErrorCode::InvalidProviderConfig => "INVALID_PROVIDER_CONFIG",
            ErrorCode::InvalidPrivateKey => "INVALID_PRIVATE_KEY",
            ErrorCode::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCode::OrderExpired => "ORDER_EXPIRED",
            ErrorCode::InvalidOrderStatus => "INVALID_ORDER_STATUS",
            ErrorCode::NetworkMismatch => "NETWORK_MISMATCH",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorCode::TransactionSubmissionFailed => "TRANSACTION_SUBMISSION_FAILED",
            ErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ErrorCode::PaymentNotFound => "PAYMENT_NOT_FOUND",
            ErrorCode::PaymentPending => "PAYMENT_PENDING",
            ErrorCode::PaymentFailed => "PAYMENT_FAILED",
            ErrorCode::PaymentAmountMismatch => "PAYMENT_AMOUNT_MISMATCH",
            ErrorCode::PaymentNotVerified => "PAYMENT_NOT_VERIFIED",
            ErrorCode::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorCode::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
            ErrorCode::ContentHashMismatch => "CONTENT_HASH_MISMATCH",
            ErrorCode::MaxPollAttempts => "MAX_POLL_ATTEMPTS",
            ErrorCode::PartialSuccess => "PARTIAL_SUCCESS",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A fully-formed IVXP error, ready to cross a process boundary.
#[derive(Debug, Clone, Serialize)]
pub struct IvxpError {
    pub name: &'static str,
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<IvxpError>>,
}

impl IvxpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        IvxpError {
            name: "IvxpError",
            code,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_cause(mut self, cause: IvxpError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// HTTP status this error maps to when surfaced by the provider engine.
    pub fn http_status(&self) -> u16 {
        use ErrorCode::*;
        match self.code {
            InvalidRequest | InvalidSignedMessage | InvalidTxHash | InvalidNumericString
            | InvalidPollOptions | InvalidProviderConfig | InvalidPrivateKey
            | InvalidOrderStatus | NetworkMismatch | ContentHashMismatch => 400,
            SignatureVerificationFailed | SignatureInvalid => 401,
            PaymentNotVerified | PaymentFailed | PaymentAmountMismatch => 402,
            OrderNotFound | ServiceNotFound | PaymentNotFound => 404,
            OrderExpired => 400,
            BudgetExceeded | InsufficientBalance => 400,
            Timeout => 504,
            _ => 500,
        }
    }
}

impl fmt::Display for IvxpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for IvxpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_serializes_as_screaming_snake_case() {
        assert_eq!(ErrorCode::BudgetExceeded.as_str(), "BUDGET_EXCEEDED");
        let json = serde_json::to_string(&ErrorCode::BudgetExceeded).unwrap();
        assert_eq!(json, "\"BUDGET_EXCEEDED\"");
    }

    #[test]
    fn cause_chain_serializes() {
        let inner = IvxpError::new(ErrorCode::Timeout, "rpc timed out");
        let outer = IvxpError::new(ErrorCode::PaymentNotVerified, "could not verify")
            .with_cause(inner);
        let json = serde_json::to_value(&outer).unwrap();
        assert_eq!(json["cause"]["code"], "TIMEOUT");
    }
}
