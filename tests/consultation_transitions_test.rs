// tests/consultation_transitions_test.rs

//! Property-based coverage of the consultation status state machine,
//! grounded on the teacher's `tests/property/consistency_test.rs` style:
//! generate arbitrary pairs of states and check the transition predicate
//! against the hand-written legal-edge list rather than re-deriving it.

use consultease::core::consultation::ConsultationStatus;
use proptest::prelude::*;

const ALL_STATES: [ConsultationStatus; 5] = [
    ConsultationStatus::Pending,
    ConsultationStatus::Accepted,
    ConsultationStatus::Busy,
    ConsultationStatus::Completed,
    ConsultationStatus::Cancelled,
];

const LEGAL_EDGES: [(ConsultationStatus, ConsultationStatus); 5] = [
    (ConsultationStatus::Pending, ConsultationStatus::Accepted),
    (ConsultationStatus::Pending, ConsultationStatus::Cancelled),
    (ConsultationStatus::Accepted, ConsultationStatus::Completed),
    (ConsultationStatus::Accepted, ConsultationStatus::Busy),
    (ConsultationStatus::Busy, ConsultationStatus::Cancelled),
];

fn state_strategy() -> impl Strategy<Value = ConsultationStatus> {
    prop::sample::select(&ALL_STATES[..])
}

proptest! {
    #[test]
    fn transition_matches_legal_edge_list(from in state_strategy(), to in state_strategy()) {
        let expected = LEGAL_EDGES.iter().any(|&(f, t)| f == from && t == to);
        prop_assert_eq!(from.can_transition_to(to), expected);
    }

    #[test]
    fn no_state_transitions_to_itself(from in state_strategy()) {
        prop_assert!(!from.can_transition_to(from));
    }
}

#[test]
fn completed_and_cancelled_are_terminal() {
    for &to in &ALL_STATES {
        assert!(!ConsultationStatus::Completed.can_transition_to(to));
        assert!(!ConsultationStatus::Cancelled.can_transition_to(to));
    }
}
