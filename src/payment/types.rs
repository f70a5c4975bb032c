//! Payment data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::payment::error::PaymentError;

/// A positive payment amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Create an amount, rejecting zero and negative values.
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount);
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| PaymentError::InvalidAmount)?;
        Self::new(value)
    }
}

/// Plain decimal form, as sent in the `amount` query parameter.
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Gateway-assigned transaction reference. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefId(String);

impl RefId {
    pub fn new(value: impl Into<String>) -> Result<Self, PaymentError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(PaymentError::EmptyReference);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefId {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for RefId {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<RefId> for String {
    fn from(id: RefId) -> Self {
        id.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A gateway-issued QR payment token. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: Amount,
    pub reference_id: RefId,
    /// Opaque image payload, usually a `data:` URI.
    pub qr_image_data: String,
    pub created_at: DateTime<Utc>,
}

/// Terminal transaction status pushed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopupStatus {
    Completed,
    Expired,
}

impl TopupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopupStatus::Completed => "COMPLETED",
            TopupStatus::Expired => "EXPIRED",
        }
    }
}

/// A status push received over the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopupStatusEvent {
    #[serde(rename = "refId")]
    pub ref_id: RefId,
    pub status: TopupStatus,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TopupStatusEvent {
    pub fn new(ref_id: RefId, status: TopupStatus) -> Self {
        Self {
            ref_id,
            status,
            amount: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

/// The authenticated user, supplied by the calling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            role: UserRole::User,
        }
    }

    /// Identity of this user as known to the gateway.
    pub fn gateway_user_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.id)
    }
}
