//! logos-author: a language model driving an interactive shell.
//!
//! A [`session::PtySession`] runs the console, a [`detector::PromptDetector`]
//! decides when it is idle, a [`provider::TextGenerator`] produces what to
//! type next, and [`agent::ConsoleAgent`] ties them together. Task progress is
//! modelled separately with the generic [`state::StateMachine`].

pub mod agent;
pub mod cli;
pub mod config;
pub mod context;
pub mod detector;
pub mod log;
pub mod provider;
pub mod session;
pub mod state;
pub mod tasks;
