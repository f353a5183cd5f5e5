//! Withdrawal state machine. `pending -> approved -> processing ->
//! completed`, with `pending -> rejected` and `processing -> failed` as the
//! two terminal escape hatches. Every transition is validated here so the
//! service layer can't accidentally apply an edge the FSM doesn't have.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawState {
    Pending,
    Approved,
    Rejected,
    Processing,
    Completed,
    Failed,
}

impl WithdrawState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WithdrawState::Rejected | WithdrawState::Completed | WithdrawState::Failed)
    }

    pub fn id(self) -> i16 {
        match self {
            WithdrawState::Pending => 0,
            WithdrawState::Approved => 1,
            WithdrawState::Rejected => 2,
            WithdrawState::Processing => 3,
            WithdrawState::Completed => 4,
            WithdrawState::Failed => 5,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawState::Pending),
            1 => Some(WithdrawState::Approved),
            2 => Some(WithdrawState::Rejected),
            3 => Some(WithdrawState::Processing),
            4 => Some(WithdrawState::Completed),
            5 => Some(WithdrawState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for WithdrawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WithdrawState::Pending => "pending",
            WithdrawState::Approved => "approved",
            WithdrawState::Rejected => "rejected",
            WithdrawState::Processing => "processing",
            WithdrawState::Completed => "completed",
            WithdrawState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOp {
    Approve,
    Reject,
    MarkProcessing,
    Complete,
    Fail,
}

impl WithdrawOp {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawOp::Approve => "approve",
            WithdrawOp::Reject => "reject",
            WithdrawOp::MarkProcessing => "mark_processing",
            WithdrawOp::Complete => "complete",
            WithdrawOp::Fail => "fail",
        }
    }

    /// The state this op moves a withdrawal into, or `None` if `from`
    /// cannot take this op.
    pub fn apply(self, from: WithdrawState) -> Option<WithdrawState> {
        use WithdrawOp::*;
        use WithdrawState::*;
        match (from, self) {
            (Pending, Approve) => Some(Approved),
            (Pending, Reject) => Some(Rejected),
            (Approved, MarkProcessing) => Some(Processing),
            (Processing, Complete) => Some(Completed),
            (Processing, Fail) => Some(Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WithdrawOp::*;
    use WithdrawState::*;

    #[test]
    fn happy_path_transitions() {
        assert_eq!(Approve.apply(Pending), Some(Approved));
        assert_eq!(MarkProcessing.apply(Approved), Some(Processing));
        assert_eq!(Complete.apply(Processing), Some(Completed));
    }

    #[test]
    fn reject_only_valid_from_pending() {
        assert_eq!(Reject.apply(Pending), Some(Rejected));
        assert_eq!(Reject.apply(Approved), None);
        assert_eq!(Reject.apply(Processing), None);
    }

    #[test]
    fn fail_only_valid_from_processing() {
        assert_eq!(Fail.apply(Processing), Some(Failed));
        assert_eq!(Fail.apply(Pending), None);
    }

    #[test]
    fn terminal_states_accept_no_further_ops() {
        for terminal in [Rejected, Completed, Failed] {
            assert!(terminal.is_terminal());
            for op in [Approve, Reject, MarkProcessing, Complete, Fail] {
                assert_eq!(op.apply(terminal), None);
            }
        }
    }

    #[test]
    fn id_round_trips() {
        for state in [Pending, Approved, Rejected, Processing, Completed, Failed] {
            assert_eq!(WithdrawState::from_id(state.id()), Some(state));
        }
    }
}
