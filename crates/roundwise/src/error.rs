//! Fatal error conditions for a pipeline run.
//!
//! Only configuration-time problems (an invalid round graph, an unreadable
//! config file) and cache write failures abort a run. Cache misses, corrupt
//! entries, failed rounds and blocked rounds are ordinary outcomes reported
//! through [`RunReport`](crate::pipeline::RunReport).

use crate::rounds::RoundId;
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The declared rounds contain a dependency cycle.
    #[error("dependency cycle among rounds {}", join_ids(.rounds))]
    CyclicRounds { rounds: Vec<RoundId> },

    #[error("round {0} is declared more than once")]
    DuplicateRound(RoundId),

    #[error("round {round} depends on undeclared round {dependency}")]
    UnknownDependency { round: RoundId, dependency: RoundId },

    /// A round selected by id or name does not exist in the graph.
    #[error("unknown round '{0}'")]
    UnknownRound(String),

    /// Persisting a freshly computed result failed. Never swallowed.
    #[error("failed to write cache entry for round {round}: {source}")]
    CacheWrite {
        round: RoundId,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize cache entry for round {round}: {source}")]
    CacheSerialize {
        round: RoundId,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to clear round cache: {0}")]
    CacheClear(#[source] std::io::Error),

    #[error("failed to list round cache: {0}")]
    CacheList(#[source] std::io::Error),

    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("file discovery failed under {}: {message}", .root.display())]
    Discovery { root: PathBuf, message: String },
}

fn join_ids(ids: &[RoundId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
