use serde::Serialize;

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                // 重复激活是幂等的
                | (Active, Activating)
                | (Activating, Active)
                | (_, Redundant)
        )
    }

    pub fn transition(self, next: LifecycleState) -> Result<LifecycleState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProxyError::InvalidState {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;

    #[test]
    fn test_happy_path() {
        let state = Parsed
            .transition(Installing)
            .and_then(|s| s.transition(Installed))
            .and_then(|s| s.transition(Activating))
            .and_then(|s| s.transition(Active))
            .unwrap();
        assert_eq!(state, Active);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(Parsed.transition(Active).is_err());
        assert!(Installing.transition(Activating).is_err());
        assert!(Redundant.transition(Installing).is_err());

        let err = Installed.transition(Installing).unwrap_err();
        assert_eq!(err.to_string(), "Invalid lifecycle transition: installed -> installing");
    }

    #[test]
    fn test_any_state_can_become_redundant() {
        for state in [Parsed, Installing, Installed, Activating, Active] {
            assert!(state.can_transition_to(Redundant));
        }
    }
}
