//! Dependency-aware round ordering.
//!
//! Rounds declare `depends_on` edges to other rounds. At startup the
//! declarations are validated (unique ids, no dangling edges, no cycles) and
//! grouped into execution waves via topological sort: wave 0 holds every
//! round without dependencies, wave _k_ holds rounds whose dependencies all
//! sit in earlier waves. Rounds within a wave may run concurrently; wave
//! _k_ + 1 never starts before wave _k_ is finished.
//!
//! The graph is fixed per application version. A cycle is a configuration
//! error naming the rounds involved, never a runtime condition.

use super::{RoundDefinition, RoundId};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Round ids that can execute concurrently, in ascending id order.
pub type ExecutionWave = Vec<RoundId>;

/// A validated, wave-partitioned set of round definitions.
#[derive(Debug, Clone)]
pub struct RoundGraph {
    rounds: BTreeMap<RoundId, RoundDefinition>,
    waves: Vec<ExecutionWave>,
}

impl RoundGraph {
    /// Validate `definitions` and compute execution waves.
    pub fn new(definitions: Vec<RoundDefinition>) -> Result<Self> {
        let mut rounds = BTreeMap::new();
        for def in definitions {
            let id = def.id;
            if rounds.insert(id, def).is_some() {
                return Err(Error::DuplicateRound(id));
            }
        }

        for def in rounds.values() {
            if let Some(&missing) = def.depends_on.iter().find(|&&d| !rounds.contains_key(&d)) {
                return Err(Error::UnknownDependency {
                    round: def.id,
                    dependency: missing,
                });
            }
        }

        let waves = build_execution_waves(&rounds)?;
        Ok(Self { rounds, waves })
    }

    /// Execution waves in scheduling order.
    pub fn waves(&self) -> &[ExecutionWave] {
        &self.waves
    }

    pub fn get(&self, id: RoundId) -> Option<&RoundDefinition> {
        self.rounds.get(&id)
    }

    pub fn contains(&self, id: RoundId) -> bool {
        self.rounds.contains_key(&id)
    }

    /// All definitions in ascending id order.
    pub fn definitions(&self) -> impl Iterator<Item = &RoundDefinition> {
        self.rounds.values()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Find a round by its name.
    pub fn find(&self, name: &str) -> Option<&RoundDefinition> {
        self.rounds.values().find(|d| d.name == name)
    }

    /// Rounds that directly depend on `id`.
    pub fn dependents(&self, id: RoundId) -> Vec<RoundId> {
        self.rounds
            .values()
            .filter(|d| d.depends_on.contains(&id))
            .map(|d| d.id)
            .collect()
    }

    /// Restrict the graph to `selected` rounds plus everything they
    /// transitively depend on. Upstream rounds are kept because their
    /// results feed the selected rounds' prompts and cache keys.
    pub fn restrict_to(&self, selected: &[RoundId]) -> Result<Self> {
        let mut keep = BTreeSet::new();
        let mut stack: Vec<RoundId> = Vec::new();
        for &id in selected {
            if !self.contains(id) {
                return Err(Error::UnknownRound(id.to_string()));
            }
            stack.push(id);
        }

        while let Some(id) = stack.pop() {
            if !keep.insert(id) {
                continue;
            }
            if let Some(def) = self.rounds.get(&id) {
                stack.extend(def.depends_on.iter().copied());
            }
        }

        let definitions = self
            .rounds
            .values()
            .filter(|d| keep.contains(&d.id))
            .cloned()
            .collect();
        Self::new(definitions)
    }

    /// Resolve a round reference given either as a numeric id or a name.
    pub fn resolve(&self, reference: &str) -> Result<RoundId> {
        let reference = reference.trim();
        if let Ok(id) = reference.parse::<RoundId>()
            && self.contains(id)
        {
            return Ok(id);
        }
        self.find(reference)
            .map(|d| d.id)
            .ok_or_else(|| Error::UnknownRound(reference.to_string()))
    }
}

/// Kahn's algorithm, grouping nodes released in the same step into one wave.
fn build_execution_waves(rounds: &BTreeMap<RoundId, RoundDefinition>) -> Result<Vec<ExecutionWave>> {
    let mut in_degree: BTreeMap<RoundId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<RoundId, Vec<RoundId>> = BTreeMap::new();

    for def in rounds.values() {
        in_degree.insert(def.id, def.depends_on.len());
        for &dep in &def.depends_on {
            dependents.entry(dep).or_default().push(def.id);
        }
    }

    let mut waves: Vec<ExecutionWave> = Vec::new();
    let mut current: ExecutionWave = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut processed = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for id in &current {
            processed += 1;
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        next.sort_unstable();
        waves.push(std::mem::replace(&mut current, next));
    }

    if processed < rounds.len() {
        let unresolved: BTreeSet<RoundId> = in_degree
            .into_iter()
            .filter(|&(_, deg)| deg > 0)
            .map(|(id, _)| id)
            .collect();
        return Err(Error::CyclicRounds {
            rounds: cycle_members(&unresolved, &dependents),
        });
    }

    Ok(waves)
}

/// Narrow the unresolved set down to rounds on (or between) cycles by
/// repeatedly dropping rounds with no unresolved dependents. Rounds merely
/// downstream of a cycle are removed this way.
fn cycle_members(
    unresolved: &BTreeSet<RoundId>,
    dependents: &BTreeMap<RoundId, Vec<RoundId>>,
) -> Vec<RoundId> {
    let mut remaining = unresolved.clone();
    loop {
        let sinks: Vec<RoundId> = remaining
            .iter()
            .copied()
            .filter(|id| {
                !dependents
                    .get(id)
                    .into_iter()
                    .flatten()
                    .any(|d| remaining.contains(d))
            })
            .collect();
        if sinks.is_empty() {
            break;
        }
        for id in sinks {
            remaining.remove(&id);
        }
    }
    remaining.into_iter().collect()
}
