//! Connection state machine.
//!
//! Which request is legal at which point of a session is a table lookup on
//! `(State, tag)`. The table belongs to the negotiated protocol version; the
//! machine itself is the same for every version.
//!
//! # Key Components
//!
//! - [`State`]: session lifecycle states.
//! - [`StateMachineConfiguration`]: the per-version transition table, derived
//!   from its predecessor with `with_state`/`without` deltas.
//! - [`StateMachine`]: applies requests to a [`Session`] and produces
//!   responses.
//!
//! # Failure handling
//!
//! A request with no transition in the current state, an undecodable request
//! and a failing collaborator all answer one FAILURE and move the session to
//! `Failed`, where everything but RESET and GOODBYE is answered with IGNORED.
//! Rejected credentials are the exception: the session stays in
//! `Authentication` so the client can try again.
mod actions;
mod config;
mod machine;
mod session;
mod state;

pub use config::{Action, StateMachineBuilder, StateMachineConfiguration, Transition, TransitionError};
pub use machine::StateMachine;
pub use session::Session;
pub use state::State;
