//! Transition checking for lifecycle enums.

use super::ValidationError;

/// A lifecycle enum with a fixed set of legal edges.
///
/// Implementors list the edges; everything else derives from them.
///
/// ```ignore
/// let next = SessionState::Connecting.transition_to(SessionState::Authenticating)?;
/// ```
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// States reachable in one step from `self`.
    fn valid_transitions(&self) -> Vec<Self>;

    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Returns `target` if the edge exists.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("{:?} -> {:?} is not allowed", self, target),
            ))
        }
    }

    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}
