pub mod error;
pub mod types;

pub use error::{ConflictReason, Error, Result, ValidationError};
pub use types::{
    ClaimResponse, ErrorBody, FORWARDED_FOR_HEADER, MAX_CLAIM_NUMBER, ProcessRequest,
    parse_number, parse_process_body,
};
