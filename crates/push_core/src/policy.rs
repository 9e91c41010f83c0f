//! Delivery timing and routing decisions for a single request.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::model::{DeviceToken, Request};

/// Lookahead covering the gap until the next run plus relay latency.
pub const DELIVERY_HORIZON_MINUTES: i64 = 6;
/// Requests whose horizon overshoots their schedule by this much are dropped.
pub const EXPIRY_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Too old to deliver; delete.
    Expired,
    /// Not due yet; leave for a later run.
    Deferred,
    /// No device token; delete.
    Stale,
    /// The token record exists but could not be read; leave for a later run.
    TokenUnavailable(String),
    /// Push now with the request's own content.
    Immediate(DeviceToken),
    /// Fold into the device's update batch and delete.
    Coalesce,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Expired => "expired",
            Verdict::Deferred => "deferred",
            Verdict::Stale => "stale",
            Verdict::TokenUnavailable(_) => "token-unavailable",
            Verdict::Immediate(_) => "immediate",
            Verdict::Coalesce => "coalesce",
        }
    }
}

/// `(now + horizon) - scheduled_time`
pub fn time_since_horizon(request: &Request, now: DateTime<Utc>) -> Duration {
    now + Duration::minutes(DELIVERY_HORIZON_MINUTES) - request.scheduled_time
}

/// Classifies `request`. The token is only resolved once the request is due.
///
/// A resolver error means the token could not be read, which is different
/// from a token that does not exist: only the latter makes the request stale.
pub fn evaluate(
    request: &Request,
    now: DateTime<Utc>,
    resolve_token: impl FnOnce(&str) -> Result<DeviceToken>,
) -> Verdict {
    let since_horizon = time_since_horizon(request, now);
    if since_horizon >= Duration::hours(EXPIRY_HOURS) {
        return Verdict::Expired;
    }
    if since_horizon < Duration::zero() {
        return Verdict::Deferred;
    }

    let token = match resolve_token(&request.device) {
        Ok(token) => token,
        Err(err) => return Verdict::TokenUnavailable(err.to_string()),
    };
    if token.is_missing() {
        return Verdict::Stale;
    }
    if request.is_update() {
        Verdict::Coalesce
    } else {
        Verdict::Immediate(token)
    }
}
