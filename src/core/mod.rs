//! Core engine for merge-train operations
//!
//! This module contains the building blocks every command uses:
//!
//! - **config**: train.toml parsing and validation
//! - **context**: build context (CI inputs, status output, handoff file)
//! - **error**: error taxonomy with exit codes and contextual help
//! - **factory**: picks the repository and backend for a run
//! - **orchestrator**: the merge train state machine
//! - **plan**: dry-run plans and their serialization
//! - **sequencer**: `rYYWW` release naming and ordering
//! - **template**: handlebars rendering for labels and seed files
//! - **vcs**: Mercurial and Git backends over a command runner

pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod orchestrator;
pub mod plan;
pub mod sequencer;
pub mod template;
pub mod vcs;
