//! Declarative state machine with guarded transitions.
//!
//! Machines are assembled once through [`StateMachineBuilder`] and then only
//! move through [`StateMachine::transition`]. The engine knows nothing about
//! shells or models; task logic layers its own state names on top.
//!
//! ```text
//! builder.state(A).state(B).start(A)?.transition(A, B)?.build()?
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use thiserror::Error;

/// Side-effect-free predicate consulted right before a transition is taken.
pub type Guard = Box<dyn Fn() -> bool + Send + Sync>;

/// Errors raised by the builder and by runtime transitions.
///
/// State names are rendered with their `Debug` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("state {0} is not defined")]
    MissingState(String),
    #[error("start state is already defined as {0}")]
    StartAlreadyDefined(String),
    #[error("no start state defined; call start() before build()")]
    NoStartState,
    #[error("build() has already been called on this builder")]
    BuildAlreadyCalled,
    #[error("invalid transition from {from} to {to}: no such edge is defined")]
    InvalidTransition { from: String, to: String },
    #[error("guard condition blocked transition from {from} to {to}")]
    GuardBlocked { from: String, to: String },
}

fn label<N: fmt::Debug>(name: &N) -> String {
    format!("{name:?}")
}

/// A named state with optional immutable properties.
#[derive(Debug, Clone, PartialEq)]
pub struct State<N, P> {
    pub name: N,
    pub props: Option<P>,
}

struct Transition<N> {
    to: N,
    guard: Option<Guard>,
}

impl<N: fmt::Debug> fmt::Debug for Transition<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("to", &self.to)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// A built state machine: current state plus an index of outgoing edges.
pub struct StateMachine<N, P> {
    current: N,
    states: HashMap<N, State<N, P>>,
    transitions: HashMap<N, Vec<Transition<N>>>,
}

impl<N, P> StateMachine<N, P>
where
    N: Clone + Eq + Hash + fmt::Debug,
{
    pub fn builder() -> StateMachineBuilder<N, P> {
        StateMachineBuilder::new()
    }

    /// The current state.
    pub fn state(&self) -> &State<N, P> {
        // Every name reachable as `current` was registered by the builder.
        &self.states[&self.current]
    }

    /// Name of the current state.
    pub fn current(&self) -> &N {
        &self.current
    }

    /// Move to `to` along a defined edge whose guard (if any) passes.
    ///
    /// On error the current state is left untouched.
    pub fn transition(&mut self, to: N) -> Result<(), StateMachineError> {
        let edge = self
            .transitions
            .get(&self.current)
            .and_then(|edges| edges.iter().find(|t| t.to == to))
            .ok_or_else(|| StateMachineError::InvalidTransition {
                from: label(&self.current),
                to: label(&to),
            })?;

        if let Some(guard) = &edge.guard {
            if !guard() {
                return Err(StateMachineError::GuardBlocked {
                    from: label(&self.current),
                    to: label(&to),
                });
            }
        }

        self.current = to;
        Ok(())
    }

    /// Whether `transition(to)` would succeed right now.
    pub fn can_transition(&self, to: &N) -> bool {
        self.transitions
            .get(&self.current)
            .and_then(|edges| edges.iter().find(|t| &t.to == to))
            .is_some_and(|t| t.guard.as_ref().is_none_or(|g| g()))
    }

    /// Names of the states with an edge out of the current state.
    pub fn targets(&self) -> Vec<&N> {
        self.transitions
            .get(&self.current)
            .map(|edges| edges.iter().map(|t| &t.to).collect())
            .unwrap_or_default()
    }
}

impl<N: fmt::Debug, P> fmt::Debug for StateMachine<N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("transitions", &self.transitions)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StateMachine`].
///
/// Methods take `&mut self` so misuse (a second `start`, a second `build`)
/// is reported against the same builder instance.
pub struct StateMachineBuilder<N, P> {
    states: HashMap<N, State<N, P>>,
    start: Option<N>,
    transitions: Vec<(N, Transition<N>)>,
    built: bool,
}

impl<N: fmt::Debug, P> fmt::Debug for StateMachineBuilder<N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachineBuilder")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("start", &self.start)
            .field("transitions", &self.transitions)
            .field("built", &self.built)
            .finish()
    }
}

impl<N, P> Default for StateMachineBuilder<N, P>
where
    N: Clone + Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<N, P> StateMachineBuilder<N, P>
where
    N: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            start: None,
            transitions: Vec::new(),
            built: false,
        }
    }

    /// Register a state without properties. Re-registering replaces it.
    pub fn state(&mut self, name: N) -> &mut Self {
        self.states.insert(name.clone(), State { name, props: None });
        self
    }

    /// Register a state carrying `props`.
    pub fn state_with(&mut self, name: N, props: P) -> &mut Self {
        self.states.insert(
            name.clone(),
            State {
                name,
                props: Some(props),
            },
        );
        self
    }

    pub fn start(&mut self, name: N) -> Result<&mut Self, StateMachineError> {
        self.ensure_not_built()?;
        if !self.states.contains_key(&name) {
            return Err(StateMachineError::MissingState(label(&name)));
        }
        if let Some(existing) = &self.start {
            return Err(StateMachineError::StartAlreadyDefined(label(existing)));
        }
        self.start = Some(name);
        Ok(self)
    }

    pub fn transition(&mut self, from: N, to: N) -> Result<&mut Self, StateMachineError> {
        self.add_transition(from, to, None)
    }

    pub fn guarded_transition<G>(
        &mut self,
        from: N,
        to: N,
        guard: G,
    ) -> Result<&mut Self, StateMachineError>
    where
        G: Fn() -> bool + Send + Sync + 'static,
    {
        self.add_transition(from, to, Some(Box::new(guard)))
    }

    fn add_transition(
        &mut self,
        from: N,
        to: N,
        guard: Option<Guard>,
    ) -> Result<&mut Self, StateMachineError> {
        self.ensure_not_built()?;
        for name in [&from, &to] {
            if !self.states.contains_key(name) {
                return Err(StateMachineError::MissingState(label(name)));
            }
        }
        self.transitions.push((from, Transition { to, guard }));
        Ok(self)
    }

    /// Produce the machine. Callable once per builder.
    pub fn build(&mut self) -> Result<StateMachine<N, P>, StateMachineError> {
        self.ensure_not_built()?;
        let start = self.start.clone().ok_or(StateMachineError::NoStartState)?;
        self.built = true;

        let mut index: HashMap<N, Vec<Transition<N>>> = HashMap::new();
        for (from, transition) in self.transitions.drain(..) {
            index.entry(from).or_default().push(transition);
        }

        Ok(StateMachine {
            current: start,
            states: std::mem::take(&mut self.states),
            transitions: index,
        })
    }

    fn ensure_not_built(&self) -> Result<(), StateMachineError> {
        if self.built {
            Err(StateMachineError::BuildAlreadyCalled)
        } else {
            Ok(())
        }
    }
}
