//! Per-version transition tables.
//!
//! A [`StateMachineConfiguration`] is plain data: which request tag is legal
//! in which state, what it does, and where it leads. Versions derive their
//! table from the previous one with `with_state`/`without` deltas, the same
//! way struct registries are derived.
use std::collections::HashMap;

use thiserror::Error;

use super::State;

/// What a transition does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `authenticate` is set while HELLO still carries credentials.
    Hello { authenticate: bool },
    Logon,
    Logoff,
    Goodbye,
    Reset,
    Run,
    Begin,
    Commit,
    Rollback,
    Pull,
    Discard,
    Route,
    Telemetry,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub tag: u8,
    pub action: Action,
    pub next: State,
}

impl Transition {
    pub const fn new(tag: u8, action: Action, next: State) -> Self {
        Self { tag, action, next }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("no transition for tag {tag:#04x} in {state} to remove")]
    NotRegistered { state: State, tag: u8 },
    #[error("no initial state configured")]
    NoInitialState,
}

#[derive(Debug, Clone)]
pub struct StateMachineConfiguration {
    initial: State,
    transitions: HashMap<(State, u8), Transition>,
}

impl StateMachineConfiguration {
    pub fn builder() -> StateMachineBuilder {
        StateMachineBuilder::default()
    }

    pub fn initial(&self) -> State {
        self.initial
    }

    pub fn transition(&self, state: State, tag: u8) -> Option<&Transition> {
        self.transitions.get(&(state, tag))
    }

    /// Tags accepted in `state`, ascending.
    pub fn tags_in(&self, state: State) -> Vec<u8> {
        let mut tags = self
            .transitions
            .keys()
            .filter(|(s, _)| *s == state)
            .map(|(_, tag)| *tag)
            .collect::<Vec<_>>();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

enum Delta {
    With(State, Transition),
    Without(State, u8),
    IgnoreRest(State, Vec<u8>),
}

#[derive(Default)]
pub struct StateMachineBuilder {
    initial: Option<State>,
    base: HashMap<(State, u8), Transition>,
    deltas: Vec<Delta>,
}

impl StateMachineBuilder {
    pub fn inherit_from(mut self, config: &StateMachineConfiguration) -> Self {
        self.initial = Some(config.initial);
        self.base = config.transitions.clone();
        self
    }

    pub fn initial(mut self, state: State) -> Self {
        self.initial = Some(state);
        self
    }

    /// Adds a transition, replacing whatever `state` did with the same tag.
    pub fn with_state(mut self, state: State, transition: Transition) -> Self {
        self.deltas.push(Delta::With(state, transition));
        self
    }

    pub fn without(mut self, state: State, tag: u8) -> Self {
        self.deltas.push(Delta::Without(state, tag));
        self
    }

    /// Answers every tag in `tags` that `state` has no transition for with
    /// IGNORED, staying in `state`.
    pub fn ignore_rest(mut self, state: State, tags: impl IntoIterator<Item = u8>) -> Self {
        self.deltas
            .push(Delta::IgnoreRest(state, tags.into_iter().collect()));
        self
    }

    pub fn build(self) -> Result<StateMachineConfiguration, TransitionError> {
        let initial = self.initial.ok_or(TransitionError::NoInitialState)?;
        let mut transitions = self.base;
        for delta in self.deltas {
            match delta {
                Delta::With(state, transition) => {
                    transitions.insert((state, transition.tag), transition);
                }
                Delta::Without(state, tag) => {
                    transitions
                        .remove(&(state, tag))
                        .ok_or(TransitionError::NotRegistered { state, tag })?;
                }
                Delta::IgnoreRest(state, tags) => {
                    for tag in tags {
                        transitions
                            .entry((state, tag))
                            .or_insert(Transition::new(tag, Action::Ignore, state));
                    }
                }
            }
        }
        Ok(StateMachineConfiguration {
            initial,
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::tag;

    fn base() -> StateMachineConfiguration {
        StateMachineConfiguration::builder()
            .initial(State::Authentication)
            .with_state(
                State::Authentication,
                Transition::new(tag::HELLO, Action::Hello { authenticate: true }, State::Ready),
            )
            .with_state(State::Ready, Transition::new(tag::RESET, Action::Reset, State::Ready))
            .build()
            .unwrap()
    }

    #[test]
    fn with_state_replaces_existing_entry() {
        let derived = StateMachineConfiguration::builder()
            .inherit_from(&base())
            .with_state(
                State::Authentication,
                Transition::new(tag::HELLO, Action::Hello { authenticate: false }, State::Ready),
            )
            .build()
            .unwrap();
        assert_eq!(derived.len(), 2);
        assert_eq!(
            derived.transition(State::Authentication, tag::HELLO).map(|t| t.action),
            Some(Action::Hello { authenticate: false })
        );
    }

    #[test]
    fn without_requires_an_entry() {
        let err = StateMachineConfiguration::builder()
            .inherit_from(&base())
            .without(State::Ready, tag::COMMIT)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotRegistered {
                state: State::Ready,
                tag: tag::COMMIT
            }
        );
    }

    #[test]
    fn ignore_rest_keeps_explicit_transitions() {
        let config = StateMachineConfiguration::builder()
            .inherit_from(&base())
            .ignore_rest(State::Ready, [tag::RESET, tag::RUN])
            .build()
            .unwrap();
        assert_eq!(
            config.transition(State::Ready, tag::RESET).map(|t| t.action),
            Some(Action::Reset)
        );
        assert_eq!(
            config.transition(State::Ready, tag::RUN).map(|t| t.action),
            Some(Action::Ignore)
        );
        assert_eq!(config.tags_in(State::Ready), vec![tag::RESET, tag::RUN]);
    }

    #[test]
    fn initial_state_is_required() {
        assert_eq!(
            StateMachineConfiguration::builder().build().unwrap_err(),
            TransitionError::NoInitialState
        );
    }
}
