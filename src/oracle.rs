//! Optional advisory service consulted for a phase strategy and for stagnation
//! interventions. The search never depends on it: every failure falls back.

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::data::{ReferenceData, TimetableGrid};
use crate::operators::HeuristicKind;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSummary {
    pub num_batches: usize,
    pub num_classes: usize,
    pub num_faculty: usize,
    pub num_rooms: usize,
    pub num_constraints: usize,
}

/// A run of generations sharing one heuristic probability map.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub generations: usize,
    pub heuristic_weights: BTreeMap<HeuristicKind, f64>,
}

impl Phase {
    fn new(generations: usize, weights: [(HeuristicKind, f64); 4]) -> Self {
        Self {
            generations,
            heuristic_weights: weights.into_iter().collect(),
        }
    }
}

/// Explore-heavy, then balanced, then exploit-heavy.
pub fn default_strategy() -> Vec<Phase> {
    use HeuristicKind::*;
    vec![
        Phase::new(10, [(Crossover, 0.5), (Move, 0.4), (Swap, 0.1), (SimulatedAnnealing, 0.0)]),
        Phase::new(10, [(Crossover, 0.2), (Move, 0.2), (Swap, 0.5), (SimulatedAnnealing, 0.1)]),
        Phase::new(5, [(Crossover, 0.0), (Move, 0.1), (Swap, 0.4), (SimulatedAnnealing, 0.5)]),
    ]
}

fn is_usable(strategy: &[Phase]) -> bool {
    !strategy.is_empty() && strategy.iter().all(|p| p.generations > 0)
}

/// One placed class as shown to the advisory service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentBrief {
    pub id: String,
    pub subject_code: String,
    pub batch_name: String,
    pub day_name: String,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionRequest {
    pub assignments: Vec<AssignmentBrief>,
}

impl InterventionRequest {
    /// Describes every class in `grid` by subject code, batch name and day name.
    pub fn from_grid(grid: &TimetableGrid, reference: &ReferenceData, day_names: &[String]) -> Self {
        let assignments = grid
            .assignments()
            .map(|a| AssignmentBrief {
                id: a.id.clone(),
                subject_code: reference
                    .subjects
                    .iter()
                    .find(|s| s.id == a.subject_id)
                    .map_or_else(|| "unknown".to_string(), |s| s.code.clone()),
                batch_name: reference
                    .batches
                    .iter()
                    .find(|b| b.id == a.batch_id)
                    .map_or_else(|| "unknown".to_string(), |b| b.name.clone()),
                day_name: day_names
                    .get(a.day as usize)
                    .cloned()
                    .unwrap_or_else(|| format!("Day {}", a.day)),
                slot: a.slot,
            })
            .collect();
        Self { assignments }
    }
}

/// Two classes the advisory service suggests exchanging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SwapSuggestion {
    #[serde(rename = "classId1")]
    pub first_id: String,
    #[serde(rename = "classId2")]
    pub second_id: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    #[error("advisory service is overloaded: {0}")]
    Overloaded(String),
    #[error("advisory service is unavailable: {0}")]
    Unavailable(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn phase_strategy(&self, summary: &ProblemSummary) -> Result<Vec<Phase>, OracleError>;

    async fn propose_intervention(
        &self,
        request: &InterventionRequest,
    ) -> Result<Option<SwapSuggestion>, OracleError>;
}

/// Used when no advisory service is configured: the default strategy and no interventions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

#[async_trait]
impl Oracle for NoOracle {
    async fn phase_strategy(&self, _summary: &ProblemSummary) -> Result<Vec<Phase>, OracleError> {
        Ok(default_strategy())
    }

    async fn propose_intervention(
        &self,
        _request: &InterventionRequest,
    ) -> Result<Option<SwapSuggestion>, OracleError> {
        Ok(None)
    }
}

/// Retries `call` after `delay`, doubling the delay each time, but only while it
/// reports `Overloaded` and retries remain. Any other outcome is returned as is.
pub async fn with_retry<T, F, Fut>(
    mut call: F,
    retries: u32,
    delay: Duration,
) -> Result<T, OracleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OracleError>>,
{
    let mut remaining = retries;
    let mut delay = delay;
    loop {
        match call().await {
            Err(OracleError::Overloaded(reason)) if remaining > 0 => {
                warn!(
                    "Advisory service overloaded ({}). Retrying in {:?}, {} retries left.",
                    reason, delay, remaining
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                remaining -= 1;
            }
            outcome => return outcome,
        }
    }
}

/// Asks for a phase strategy, falling back to `default_strategy()` on any failure
/// or on an unusable answer.
pub async fn consult_phase_strategy(
    oracle: &dyn Oracle,
    summary: &ProblemSummary,
    config: &EngineConfig,
) -> Vec<Phase> {
    let answer = with_retry(
        || oracle.phase_strategy(summary),
        config.strategy_retries,
        config.strategy_retry_delay(),
    )
    .await;
    match answer {
        Ok(strategy) if is_usable(&strategy) => {
            info!("Using advisory strategy with {} phases.", strategy.len());
            strategy
        }
        Ok(_) => {
            warn!("Advisory strategy was empty or had an empty phase; using the default strategy.");
            default_strategy()
        }
        Err(e) => {
            warn!("Could not get an advisory strategy ({}); using the default strategy.", e);
            default_strategy()
        }
    }
}

/// Asks for a stagnation intervention, racing the retrying call against the
/// configured timeout. Failure and timeout both mean no intervention.
pub async fn consult_intervention(
    oracle: &dyn Oracle,
    request: &InterventionRequest,
    config: &EngineConfig,
) -> Option<SwapSuggestion> {
    let timeout = config.intervention_timeout();
    let call = with_retry(
        || oracle.propose_intervention(request),
        config.intervention_retries,
        config.intervention_retry_delay(),
    );
    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(OracleError::TimedOut(timeout)),
    };
    match outcome {
        Ok(suggestion) => suggestion,
        Err(e) => {
            warn!("Intervention request failed: {}", e);
            None
        }
    }
}
