//! # Domain Invariants
//!
//! Constants and predicates the pipelines must always honour.

use super::entities::EndorsementResponse;
use super::errors::GatewayError;

/// Proposal response status marking a successful endorsement.
pub const SUCCESS_STATUS: u32 = 200;

/// Ordering service status marking acceptance. Compared exactly.
pub const COMMIT_SUCCESS: &str = "SUCCESS";

/// Validation code of a validly committed transaction.
pub const VALID_CODE: &str = "VALID";

/// Nonce length in bytes.
pub const NONCE_LENGTH: usize = 24;

/// Invariant: a response is valid iff it carries status 200 and no transport error.
pub fn invariant_response_valid(response: &EndorsementResponse) -> bool {
    response.transport_error.is_none() && response.status == SUCCESS_STATUS
}

/// Invariant: only the exact acceptance marker counts as success.
pub fn invariant_commit_accepted(status: Option<&str>) -> bool {
    status == Some(COMMIT_SUCCESS)
}

/// Invariant: proposals name a chaincode and a function.
pub fn invariant_proposal_named(chaincode_id: &str, function: &str) -> Result<(), GatewayError> {
    if chaincode_id.trim().is_empty() {
        return Err(GatewayError::InvalidArgument(
            "chaincode id must not be empty".to_string(),
        ));
    }
    if function.trim().is_empty() {
        return Err(GatewayError::InvalidArgument(
            "transaction name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Invariant: a block window is well formed.
pub fn invariant_block_window(start: Option<u64>, end: Option<u64>) -> Result<(), GatewayError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(GatewayError::InvalidArgument(format!(
                "end block {end} is before start block {start}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_accepted_exact_match() {
        assert!(invariant_commit_accepted(Some("SUCCESS")));
        assert!(!invariant_commit_accepted(Some("success")));
        assert!(!invariant_commit_accepted(Some("BAD_REQUEST")));
        assert!(!invariant_commit_accepted(None));
    }

    #[test]
    fn test_proposal_named() {
        assert!(invariant_proposal_named("basic", "CreateAsset").is_ok());
        assert!(matches!(
            invariant_proposal_named("basic", " "),
            Err(GatewayError::InvalidArgument(_))
        ));
        assert!(invariant_proposal_named("", "f").is_err());
    }

    #[test]
    fn test_block_window() {
        assert!(invariant_block_window(Some(1), Some(10)).is_ok());
        assert!(invariant_block_window(Some(5), Some(5)).is_ok());
        assert!(invariant_block_window(None, Some(0)).is_ok());
        assert!(invariant_block_window(Some(10), Some(1)).is_err());
    }
}
