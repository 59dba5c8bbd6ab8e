//! Tunable constants for the search and the server.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::EngineError;

/// Search parameters. Every field has a default so callers can override a subset.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub population_size: usize,
    /// Hard cap on generations summed over all phases.
    pub max_generations: usize,
    pub elitism_count: usize,
    pub tournament_size: usize,
    pub stagnation_limit_exit: usize,
    pub stagnation_limit_intervention: usize,
    pub perfect_score_threshold: f64,
    pub mutation_rate: f64,
    pub move_attempts: usize,
    pub repair_attempts: usize,
    pub annealing: AnnealingConfig,
    pub strategy_retries: u32,
    pub strategy_retry_delay_ms: u64,
    pub intervention_retries: u32,
    pub intervention_retry_delay_ms: u64,
    pub intervention_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            max_generations: 25,
            elitism_count: 2,
            tournament_size: 5,
            stagnation_limit_exit: 8,
            stagnation_limit_intervention: 5,
            perfect_score_threshold: 990.0,
            mutation_rate: 0.1,
            move_attempts: 50,
            repair_attempts: 100,
            annealing: AnnealingConfig::default(),
            strategy_retries: 2,
            strategy_retry_delay_ms: 1000,
            intervention_retries: 1,
            intervention_retry_delay_ms: 500,
            intervention_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn strategy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.strategy_retry_delay_ms)
    }

    pub fn intervention_retry_delay(&self) -> Duration {
        Duration::from_millis(self.intervention_retry_delay_ms)
    }

    pub fn intervention_timeout(&self) -> Duration {
        Duration::from_millis(self.intervention_timeout_ms)
    }

    /// Rejects overrides the search cannot run with, such as a cooling schedule
    /// that never reaches its floor.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| Err(EngineError::InvalidConfig(reason.to_string()));
        if self.population_size == 0 {
            return invalid("populationSize must be at least 1");
        }
        if self.tournament_size == 0 {
            return invalid("tournamentSize must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid("mutationRate must be within [0, 1]");
        }
        self.annealing.validate()
    }
}

/// Geometric cooling schedule for the simulated-annealing operator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnnealingConfig {
    pub initial_temperature: f64,
    pub cooling_rate: f64,
    pub min_temperature: f64,
    pub iterations_per_temperature: usize,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 80.0,
            cooling_rate: 0.98,
            min_temperature: 0.1,
            iterations_per_temperature: 1,
        }
    }
}

impl AnnealingConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| Err(EngineError::InvalidConfig(reason.to_string()));
        if !(self.min_temperature > 0.0 && self.min_temperature.is_finite()) {
            return invalid("annealing.minTemperature must be a positive number");
        }
        if !(self.initial_temperature.is_finite() && self.initial_temperature > self.min_temperature) {
            return invalid("annealing.initialTemperature must exceed minTemperature");
        }
        if !(self.cooling_rate > 0.0 && self.cooling_rate < 1.0) {
            return invalid("annealing.coolingRate must be within (0, 1)");
        }
        Ok(())
    }
}

/// Process-level settings, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub oracle_url: Option<String>,
    pub oracle_timeout: Duration,
    /// Solve requests allowed to run at once; the search is CPU bound.
    pub max_concurrent_solves: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            oracle_url: None,
            oracle_timeout: Duration::from_secs(30),
            max_concurrent_solves: 2,
        }
    }
}

impl ServerConfig {
    /// Reads `TIMETABLE_BIND_ADDR`, `TIMETABLE_ORACLE_URL`, `TIMETABLE_ORACLE_TIMEOUT_MS`
    /// and `TIMETABLE_MAX_CONCURRENT_SOLVES`, keeping defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: lookup("TIMETABLE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            oracle_url: lookup("TIMETABLE_ORACLE_URL").filter(|url| !url.trim().is_empty()),
            oracle_timeout: lookup("TIMETABLE_ORACLE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.oracle_timeout),
            max_concurrent_solves: lookup("TIMETABLE_MAX_CONCURRENT_SOLVES")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_solves),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_engine_override() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"populationSize": 8, "annealing": {"coolingRate": 0.9}}"#)
                .unwrap();
        assert_eq!(config.population_size, 8);
        assert_eq!(config.annealing.cooling_rate, 0.9);
        assert_eq!(config.annealing.initial_temperature, 80.0);
        assert_eq!(config.elitism_count, 2);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_unusable_overrides() {
        for json in [
            r#"{"populationSize": 0}"#,
            r#"{"tournamentSize": 0}"#,
            r#"{"mutationRate": 1.5}"#,
            r#"{"annealing": {"minTemperature": -1.0}}"#,
            r#"{"annealing": {"minTemperature": 0.0}}"#,
            r#"{"annealing": {"coolingRate": 1.0}}"#,
            r#"{"annealing": {"coolingRate": 0.0}}"#,
            r#"{"annealing": {"initialTemperature": 0.05}}"#,
        ] {
            let config: EngineConfig = serde_json::from_str(json).unwrap();
            assert!(
                matches!(config.validate(), Err(EngineError::InvalidConfig(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_server_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TIMETABLE_BIND_ADDR", "0.0.0.0:9000"),
            ("TIMETABLE_ORACLE_URL", "http://advisor:7000"),
            ("TIMETABLE_ORACLE_TIMEOUT_MS", "not-a-number"),
            ("TIMETABLE_MAX_CONCURRENT_SOLVES", "0"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.oracle_url.as_deref(), Some("http://advisor:7000"));
        assert_eq!(config.oracle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_solves, 2);
    }
}
