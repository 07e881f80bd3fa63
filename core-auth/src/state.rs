//! Session lifecycle state machine.
//!
//! ```text
//! Unauthenticated --LoginAttempt--> Authenticating --LoginSucceeded--> Authenticated
//! Unauthenticated --Restore-------> Authenticated
//! Unauthenticated --SilentRefresh-> Refreshing
//! Authenticated   --RenewalStarted-> Refreshing --RenewalSucceeded|RenewalDeferred--> Authenticated
//! Refreshing      --RenewalRejected-> Unauthenticated
//! any establishing state --Fault--> Error
//! any other state --LogoutRequested--> Unauthenticated
//! ```

use crate::error::{AuthError, Result};
use crate::types::AuthState;
use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub auth_machine(Unauthenticated)

    Unauthenticated => {
        Restore => Authenticated,
        SilentRefresh => Refreshing,
        LoginAttempt => Authenticating,
        Fault => Error
    },
    Authenticating => {
        LoginSucceeded => Authenticated,
        LoginFailed => Unauthenticated,
        Fault => Error,
        LogoutRequested => Unauthenticated
    },
    Authenticated => {
        RenewalStarted => Refreshing,
        LogoutRequested => Unauthenticated
    },
    Refreshing => {
        RenewalSucceeded => Authenticated,
        RenewalRejected => Unauthenticated,
        RenewalDeferred => Authenticated,
        Fault => Error,
        LogoutRequested => Unauthenticated
    },
    Error => {
        Restore => Authenticated,
        LoginAttempt => Authenticating,
        SilentRefresh => Refreshing,
        LogoutRequested => Unauthenticated
    }
}

pub use auth_machine::Input as AuthInput;
pub use auth_machine::State as MachineState;
pub use auth_machine::StateMachine as AuthMachine;

impl From<&MachineState> for AuthState {
    fn from(state: &MachineState) -> Self {
        match state {
            MachineState::Unauthenticated => AuthState::Unauthenticated,
            MachineState::Authenticating => AuthState::Authenticating,
            MachineState::Authenticated => AuthState::Authenticated,
            MachineState::Refreshing => AuthState::Refreshing,
            MachineState::Error => AuthState::Error,
        }
    }
}

/// Public view of the machine's current state.
pub fn current(machine: &AuthMachine) -> AuthState {
    AuthState::from(machine.state())
}

/// Apply `input`, returning `(from, to)`.
///
/// An impossible transition leaves the machine untouched and reports
/// [`AuthError::InvalidTransition`] naming `action`.
pub fn apply(machine: &mut AuthMachine, input: AuthInput, action: &str) -> Result<(AuthState, AuthState)> {
    let from = current(machine);
    machine
        .consume(&input)
        .map_err(|_| AuthError::InvalidTransition {
            state: from.to_string(),
            action: action.to_string(),
        })?;
    Ok((from, current(machine)))
}
