//! # Wire Types and Input Validation
//!
//! The gateway and the backend exchange one request shape and two response
//! shapes, all JSON:
//!
//! - [`ProcessRequest`]: `{"number": <int>}`
//! - [`ClaimResponse`]: `{"user_ip": "...", "number": N, "result": N + 1}`
//! - [`ErrorBody`]: `{"error": "..."}`
//!
//! Both tiers validate inbound bodies with [`parse_process_body`], so a body
//! the gateway accepts is never rejected by the backend for shape reasons.
//!
//! ## Numeric range
//!
//! Claims are stored as `BIGINT`. A claim of `N` also probes `N + 1`, so the
//! largest accepted number is [`MAX_CLAIM_NUMBER`] (`i64::MAX - 1`). Integral
//! floats such as `5.0` are accepted as integers.

use crate::common::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest number a client may claim; `number + 1` must stay representable.
pub const MAX_CLAIM_NUMBER: i64 = i64::MAX - 1;

/// Header the gateway uses to forward the admitted client's address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// 2^63 as an `f64`; every float strictly below it fits in an `i64`.
const I64_BOUND_F64: f64 = 9_223_372_036_854_775_808.0;

/// Body of `POST /api/process` on both tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub number: i64,
}

/// Successful claim, as returned by the backend and passed through verbatim
/// by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub user_ip: String,
    pub number: i64,
    pub result: i64,
}

/// Error payload shared by every non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Validates a raw `POST /api/process` body and extracts the claim number.
///
/// Checks run in the order a client would fix them: media type, JSON syntax,
/// presence of `number`, its type, then its range.
///
/// # Errors
///
/// - [`ValidationError::UnsupportedMediaType`] if `content_type` is missing or
///   not JSON.
/// - [`ValidationError::MalformedJson`] if the body does not parse.
/// - [`ValidationError::MissingNumber`] if the body is not an object with a
///   `number` field.
/// - Any error from [`parse_number`].
pub fn parse_process_body(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<i64, ValidationError> {
    if !content_type.is_some_and(is_json_media_type) {
        return Err(ValidationError::UnsupportedMediaType);
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|_| ValidationError::MalformedJson)?;
    let number = value.get("number").ok_or(ValidationError::MissingNumber)?;
    parse_number(number)
}

/// Interprets a JSON value as a claimable number.
///
/// # Errors
///
/// - [`ValidationError::NotNumeric`] for anything that is not a JSON number
///   (including booleans and `null`).
/// - [`ValidationError::NotNonNegativeInteger`] for negative or fractional
///   values.
/// - [`ValidationError::OutOfRange`] for values above [`MAX_CLAIM_NUMBER`].
pub fn parse_number(value: &Value) -> Result<i64, ValidationError> {
    let Value::Number(number) = value else {
        return Err(ValidationError::NotNumeric);
    };

    if let Some(n) = number.as_i64() {
        return match n {
            n if n < 0 => Err(ValidationError::NotNonNegativeInteger),
            n if n > MAX_CLAIM_NUMBER => Err(ValidationError::OutOfRange),
            n => Ok(n),
        };
    }

    // Positive integers beyond i64.
    if number.is_u64() {
        return Err(ValidationError::OutOfRange);
    }

    let f = number.as_f64().ok_or(ValidationError::NotNumeric)?;
    if !f.is_finite() || f < 0.0 || f.fract() != 0.0 {
        return Err(ValidationError::NotNonNegativeInteger);
    }
    if f >= I64_BOUND_F64 {
        return Err(ValidationError::OutOfRange);
    }
    match f as i64 {
        n if n > MAX_CLAIM_NUMBER => Err(ValidationError::OutOfRange),
        n => Ok(n),
    }
}

fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const JSON: Option<&str> = Some("application/json");

    #[test]
    fn accepts_non_negative_integers() {
        assert_eq!(parse_number(&json!(0)), Ok(0));
        assert_eq!(parse_number(&json!(42)), Ok(42));
        assert_eq!(parse_number(&json!(MAX_CLAIM_NUMBER)), Ok(MAX_CLAIM_NUMBER));
    }

    #[test]
    fn integral_floats_are_integers() {
        assert_eq!(parse_number(&json!(5.0)), Ok(5));
        assert_eq!(parse_number(&json!(-0.0)), Ok(0));
    }

    #[test]
    fn rejects_negative_and_fractional() {
        assert_eq!(
            parse_number(&json!(-1)),
            Err(ValidationError::NotNonNegativeInteger)
        );
        assert_eq!(
            parse_number(&json!(3.5)),
            Err(ValidationError::NotNonNegativeInteger)
        );
        assert_eq!(
            parse_number(&json!(-2.5)),
            Err(ValidationError::NotNonNegativeInteger)
        );
    }

    #[test]
    fn rejects_values_without_a_successor() {
        assert_eq!(
            parse_number(&json!(i64::MAX)),
            Err(ValidationError::OutOfRange)
        );
        assert_eq!(
            parse_number(&json!(u64::MAX)),
            Err(ValidationError::OutOfRange)
        );
        assert_eq!(parse_number(&json!(1e300)), Err(ValidationError::OutOfRange));
    }

    #[test]
    fn rejects_non_numbers() {
        for value in [json!("5"), json!(true), json!(null), json!([1]), json!({})] {
            assert_eq!(parse_number(&value), Err(ValidationError::NotNumeric));
        }
    }

    #[test]
    fn body_requires_json_media_type() {
        assert_eq!(
            parse_process_body(None, br#"{"number": 1}"#),
            Err(ValidationError::UnsupportedMediaType)
        );
        assert_eq!(
            parse_process_body(Some("text/plain"), br#"{"number": 1}"#),
            Err(ValidationError::UnsupportedMediaType)
        );
        assert_eq!(
            parse_process_body(Some("Application/JSON; charset=utf-8"), br#"{"number": 1}"#),
            Ok(1)
        );
        assert_eq!(
            parse_process_body(Some("application/merge-patch+json"), br#"{"number": 1}"#),
            Ok(1)
        );
    }

    #[test]
    fn body_shape_errors() {
        assert_eq!(
            parse_process_body(JSON, b"{not json"),
            Err(ValidationError::MalformedJson)
        );
        assert_eq!(
            parse_process_body(JSON, br#"{"value": 1}"#),
            Err(ValidationError::MissingNumber)
        );
        assert_eq!(
            parse_process_body(JSON, b"[1, 2]"),
            Err(ValidationError::MissingNumber)
        );
        assert_eq!(
            parse_process_body(JSON, br#"{"number": null}"#),
            Err(ValidationError::NotNumeric)
        );
    }

    #[test]
    fn claim_response_wire_shape() {
        let body = ClaimResponse {
            user_ip: "10.0.0.7".to_string(),
            number: 5,
            result: 6,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"user_ip": "10.0.0.7", "number": 5, "result": 6})
        );
    }
}
