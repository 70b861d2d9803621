//! Task catalog and the research workflow.
//!
//! A task's progress is modelled on the generic state machine, separately
//! from the console session that carries it out.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::{StateMachine, StateMachineError};

/// Kinds of work an agent can be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Research,
    DesignDocumentWriting,
    DesignDocumentCritique,
    LinuxConsoleSession,
    CodeGeneration,
    CodeCritique,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        Self::Research,
        Self::DesignDocumentWriting,
        Self::DesignDocumentCritique,
        Self::LinuxConsoleSession,
        Self::CodeGeneration,
        Self::CodeCritique,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchState {
    Browsing,
    Reading,
    EditingNotes,
    FinalizingNotes,
}

impl ResearchState {
    pub const ALL: [ResearchState; 4] = [
        Self::Browsing,
        Self::Reading,
        Self::EditingNotes,
        Self::FinalizingNotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browsing => "browsing",
            Self::Reading => "reading",
            Self::EditingNotes => "editing_notes",
            Self::FinalizingNotes => "finalizing_notes",
        }
    }
}

impl fmt::Display for ResearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResearchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown research state '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// What the research task starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchProps {
    pub prompt: String,
    pub context: String,
}

pub type ResearchWorkflow = StateMachine<ResearchState, ResearchProps>;

/// `Browsing → Reading → EditingNotes → (Reading | FinalizingNotes)`.
pub fn research_workflow(props: ResearchProps) -> Result<ResearchWorkflow, StateMachineError> {
    use ResearchState::*;
    let mut builder = ResearchWorkflow::builder();
    builder
        .state_with(Browsing, props)
        .state(Reading)
        .state(EditingNotes)
        .state(FinalizingNotes);
    builder
        .start(Browsing)?
        .transition(Browsing, Reading)?
        .transition(Reading, EditingNotes)?
        .transition(EditingNotes, Reading)?
        .transition(EditingNotes, FinalizingNotes)?;
    builder.build()
}
