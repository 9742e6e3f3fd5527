//! # Endorsement Reconciliation
//!
//! Splits a settled fan-out into valid and invalid responses and applies the
//! optional strict payload agreement.

use crate::domain::{EndorsementResponse, GatewayError, GatewayResult, TransactionId};

/// Outcome of a complete endorsement fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndorsementResult {
    /// Responses with status 200 and no transport error, in target order.
    pub valid: Vec<EndorsementResponse>,
    /// Everything else, transport failures included.
    pub invalid: Vec<EndorsementResponse>,
}

impl EndorsementResult {
    /// Payload of the first valid response.
    pub fn first_payload(&self) -> Option<Vec<u8>> {
        self.valid.first().and_then(|r| r.payload.clone())
    }
}

/// Partition responses by validity, keeping their order.
pub fn classify(responses: Vec<EndorsementResponse>) -> EndorsementResult {
    let (valid, invalid) = responses.into_iter().partition(|r| r.is_valid());
    EndorsementResult { valid, invalid }
}

/// Peers whose payload differs from the first valid response.
///
/// Empty when every valid response carries identical payload bytes.
pub fn check_payload_agreement(valid: &[EndorsementResponse]) -> Vec<String> {
    let Some(first) = valid.first() else {
        return Vec::new();
    };
    valid
        .iter()
        .skip(1)
        .filter(|r| r.payload != first.payload)
        .map(|r| r.peer.clone())
        .collect()
}

/// Reconcile a settled fan-out.
///
/// # Errors
/// - `NoResponses` if nothing was contacted
/// - `NoValidResponses` if no response is valid; names the last invalid message
/// - `EndorsementMismatch` if `require_agreement` and payloads differ
pub fn reconcile(
    tx_id: &TransactionId,
    responses: Vec<EndorsementResponse>,
    require_agreement: bool,
) -> GatewayResult<EndorsementResult> {
    if responses.is_empty() {
        return Err(GatewayError::NoResponses {
            tx_id: tx_id.to_string(),
        });
    }

    let result = classify(responses);
    if result.valid.is_empty() {
        let last_error = result
            .invalid
            .last()
            .map(|r| format!("{}: {}", r.peer, r.message))
            .unwrap_or_default();
        return Err(GatewayError::NoValidResponses {
            tx_id: tx_id.to_string(),
            last_error,
            responses: result.invalid,
        });
    }

    if require_agreement {
        let peers = check_payload_agreement(&result.valid);
        if !peers.is_empty() {
            return Err(GatewayError::EndorsementMismatch {
                tx_id: tx_id.to_string(),
                peers,
            });
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Identity, ProposalResponse, TransactionContext};
    use proptest::prelude::*;

    fn tx_id() -> TransactionId {
        TransactionContext::new(Identity::new("Org1MSP", b"cert".to_vec()))
            .tx_id()
            .clone()
    }

    fn ok(peer: &str, payload: &[u8]) -> EndorsementResponse {
        EndorsementResponse::from_response(peer, ProposalResponse::success(payload.to_vec()))
    }

    fn bad(peer: &str, message: &str) -> EndorsementResponse {
        EndorsementResponse::from_response(peer, ProposalResponse::error(500, message))
    }

    #[test]
    fn test_empty_fanout_is_no_responses() {
        let err = reconcile(&tx_id(), vec![], false).unwrap_err();
        assert!(matches!(err, GatewayError::NoResponses { .. }));
    }

    #[test]
    fn test_all_invalid_names_last_message() {
        let responses = vec![bad("p1", "first failure"), bad("p2", "last failure")];
        let err = reconcile(&tx_id(), responses, false).unwrap_err();
        assert!(err.to_string().contains("last failure"));
        assert_eq!(err.responses().len(), 2);
    }

    #[test]
    fn test_mismatch_only_under_agreement() {
        let responses = vec![ok("p1", b"a"), ok("p2", b"b"), ok("p3", b"a")];
        assert!(reconcile(&tx_id(), responses.clone(), false).is_ok());

        match reconcile(&tx_id(), responses, true) {
            Err(GatewayError::EndorsementMismatch { peers, .. }) => assert_eq!(peers, vec!["p2"]),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_first_payload_distinguishes_empty() {
        let result = reconcile(&tx_id(), vec![ok("p1", b"")], false).unwrap();
        assert_eq!(result.first_payload(), Some(Vec::new()));
    }

    proptest! {
        #[test]
        fn prop_k_of_n_valid_never_errors(k in 1usize..6, extra in 0usize..6) {
            let mut responses = Vec::new();
            for i in 0..k {
                responses.push(ok(&format!("v{i}"), b"same"));
            }
            for i in 0..extra {
                responses.push(bad(&format!("x{i}"), "nope"));
            }
            let result = reconcile(&tx_id(), responses, true).unwrap();
            prop_assert_eq!(result.valid.len(), k);
            prop_assert_eq!(result.invalid.len(), extra);
        }
    }
}
