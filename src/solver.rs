use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::collections::HashSet;
use std::time::Instant;

use crate::checker::{ConflictChecker, count_hard_conflicts};
use crate::config::EngineConfig;
use crate::context::SchedulingContext;
use crate::data::{Faculty, FitnessWeights, Individual, SchedulerInput, TimetableGrid};
use crate::error::EngineError;
use crate::fitness::calculate_metrics;
use crate::operators::{
    HeuristicKind, day_wise_crossover, move_mutate, select_heuristic, simulated_annealing,
    swap_by_id, swap_mutate, tournament_select,
};
use crate::oracle::{InterventionRequest, Oracle, Phase, consult_intervention, consult_phase_strategy};
use crate::population::{greedy_repair, initialize_population};

/// Result of one run: the ranked candidates plus what the loop did to get there.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub candidates: Vec<Individual>,
    pub generations: usize,
    /// Best score recorded per generation; `-1` marks a generation whose record
    /// was invalidated by an intervention.
    pub best_scores: Vec<f64>,
}

/// Runs the phased genetic search and returns up to `candidate_count` distinct
/// timetables, best first.
pub async fn solve(input: &SchedulerInput, oracle: &dyn Oracle) -> Result<Vec<Individual>, EngineError> {
    Ok(run_search(input, oracle).await?.candidates)
}

pub async fn run_search(input: &SchedulerInput, oracle: &dyn Oracle) -> Result<SearchOutcome, EngineError> {
    let start_time = Instant::now();
    let config = input.engine.clone().unwrap_or_default();
    config.validate()?;
    let ctx = SchedulingContext::from_input(input)?;
    let weights = input.global_constraints.tuned_weights();
    let faculty = &input.reference.faculty;
    let mut rng = match input.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };

    let summary = ctx.problem_summary();
    info!(
        "Starting timetable search: {} batches, {} classes, {} faculty, {} rooms, {} pinned events.",
        summary.num_batches,
        summary.num_classes,
        summary.num_faculty,
        summary.num_rooms,
        summary.num_constraints
    );
    let strategy = consult_phase_strategy(oracle, &summary, &config).await;

    let mut population = initialize_population(
        config.population_size,
        &ctx.required_classes(),
        &ctx,
        input.base_timetable.as_ref(),
        &mut rng,
    )?;
    let mut best_scores: Vec<f64> = Vec::new();
    let mut generations = 0;

    'phases: for (index, phase) in strategy.iter().enumerate() {
        info!(
            "Phase {}/{}: {} generations, weights {:?}.",
            index + 1,
            strategy.len(),
            phase.generations,
            phase.heuristic_weights
        );
        let mut intervention_used = false;

        for generation in 0..phase.generations {
            if generations >= config.max_generations {
                info!("Generation cap of {} reached.", config.max_generations);
                break 'phases;
            }
            generations += 1;

            evaluate(&mut population, faculty, &weights);
            let Some(best) = population.first().map(Individual::score) else {
                warn!("Population is empty; nothing to evolve.");
                break 'phases;
            };
            best_scores.push(best);
            info!(
                "Generation {}/{}, Best Score: {:.2}",
                generations, config.max_generations, best
            );

            if best >= config.perfect_score_threshold {
                info!("Near-perfect solution found, stopping phase early.");
                break;
            }
            if stagnant(&best_scores, best, config.stagnation_limit_exit) {
                info!("Stagnation detected, stopping phase early.");
                break;
            }
            if !intervention_used
                && generation > config.stagnation_limit_intervention
                && stagnant(&best_scores, best, config.stagnation_limit_intervention)
            {
                intervention_used = true;
                info!("Stagnation detected, requesting an intervention.");
                if intervene(&mut population, &ctx, input, oracle, &config, &weights, &mut rng).await? {
                    if let Some(last) = best_scores.last_mut() {
                        *last = -1.0;
                    }
                }
            }

            population = next_generation(&population, phase, &ctx, &config, &weights, &mut rng)?;
        }
    }

    evaluate(&mut population, faculty, &weights);
    let candidates = distinct_best(population, input.candidate_count);

    if let Some(best) = candidates.first() {
        let conflicts = ConflictChecker::new(&input.reference).check(&best.timetable);
        info!(
            "Best candidate: score {:.2}, {} classes placed, {} hard conflicts.",
            best.score(),
            best.timetable.len(),
            count_hard_conflicts(&conflicts)
        );
    }
    info!(
        "Search finished after {} generations with {} candidates in {:.2?}.",
        generations,
        candidates.len(),
        start_time.elapsed()
    );

    Ok(SearchOutcome {
        candidates,
        generations,
        best_scores,
    })
}

/// Re-scores every individual and sorts best first.
fn evaluate(population: &mut [Individual], faculty: &[Faculty], weights: &FitnessWeights) {
    for individual in population.iter_mut() {
        individual.metrics = calculate_metrics(&individual.timetable, faculty, weights);
    }
    population.sort_by(|a, b| b.score().total_cmp(&a.score()));
}

/// True when the last `window` recorded best scores all equal `best`.
fn stagnant(history: &[f64], best: f64, window: usize) -> bool {
    window > 0 && history.len() >= window && history[history.len() - window..].iter().all(|&s| s == best)
}

/// Applies an advisory swap to a repaired copy of the best grid, replacing the
/// worst individual with it. Returns whether anything was applied.
async fn intervene(
    population: &mut [Individual],
    ctx: &SchedulingContext<'_>,
    input: &SchedulerInput,
    oracle: &dyn Oracle,
    config: &EngineConfig,
    weights: &FitnessWeights,
    rng: &mut SmallRng,
) -> Result<bool, EngineError> {
    let Some(best) = population.first() else {
        return Ok(false);
    };
    let request = InterventionRequest::from_grid(&best.timetable, &input.reference, &input.days);
    let Some(suggestion) = consult_intervention(oracle, &request, config).await else {
        return Ok(false);
    };

    let mut candidate = Individual::new(best.timetable.clone());
    if !swap_by_id(&mut candidate.timetable, ctx, &suggestion.first_id, &suggestion.second_id) {
        warn!(
            "Could not apply suggested swap of {} and {}.",
            suggestion.first_id, suggestion.second_id
        );
        return Ok(false);
    }
    info!("Intervention: swapped {} and {}.", suggestion.first_id, suggestion.second_id);
    greedy_repair(&mut candidate, ctx, config.repair_attempts, rng)?;
    candidate.metrics = calculate_metrics(&candidate.timetable, &input.reference.faculty, weights);
    if let Some(worst) = population.last_mut() {
        *worst = candidate;
    }
    Ok(true)
}

/// Elites carried over verbatim, the rest bred by tournament + phase heuristic + repair.
fn next_generation(
    population: &[Individual],
    phase: &Phase,
    ctx: &SchedulingContext<'_>,
    config: &EngineConfig,
    weights: &FitnessWeights,
    rng: &mut SmallRng,
) -> Result<Vec<Individual>, EngineError> {
    let size = config.population_size;
    let mut next: Vec<Individual> = population.iter().take(config.elitism_count.min(size)).cloned().collect();

    while next.len() < size {
        let Some(parent) = tournament_select(population, config.tournament_size, rng) else {
            break;
        };
        let heuristic = select_heuristic(&phase.heuristic_weights, rng);
        let mut offspring = match heuristic {
            HeuristicKind::Swap => {
                let mut child = parent.clone();
                swap_mutate(&mut child.timetable, config.mutation_rate, ctx, rng);
                child
            }
            HeuristicKind::Move => {
                let mut child = parent.clone();
                move_mutate(
                    &mut child.timetable,
                    config.mutation_rate,
                    config.move_attempts,
                    ctx,
                    rng,
                )?;
                child
            }
            HeuristicKind::SimulatedAnnealing => {
                simulated_annealing(parent, ctx, weights, &config.annealing, rng)
            }
            HeuristicKind::Crossover => {
                let second = tournament_select(population, config.tournament_size, rng).unwrap_or(parent);
                day_wise_crossover(parent, second, rng)
            }
        };
        debug!("Bred offspring {} with {}.", next.len(), heuristic);
        greedy_repair(&mut offspring, ctx, config.repair_attempts, rng)?;
        next.push(offspring);
    }
    Ok(next)
}

/// Keeps the first `count` individuals whose grids differ, in population order.
fn distinct_best(population: Vec<Individual>, count: usize) -> Vec<Individual> {
    let mut seen: HashSet<TimetableGrid> = HashSet::new();
    let mut distinct = Vec::new();
    for individual in population {
        if distinct.len() >= count {
            break;
        }
        if seen.insert(individual.timetable.clone()) {
            distinct.push(individual);
        }
    }
    distinct
}
