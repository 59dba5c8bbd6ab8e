//! Low-level search heuristics applied to individuals between generations.
//!
//! Every operator leaves assignments sitting on pinned (day, slot, batch) cells
//! exactly where they are, and never moves anything onto such a cell.

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::AnnealingConfig;
use crate::context::{Occupancy, SchedulingContext};
use crate::data::{ClassAssignment, Day, FitnessWeights, Individual, Slot, TimetableGrid};
use crate::error::EngineError;
use crate::fitness::calculate_metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum HeuristicKind {
    #[serde(rename = "SWAP_MUTATE")]
    Swap,
    #[serde(rename = "MOVE_MUTATE")]
    Move,
    #[serde(rename = "SIMULATED_ANNEALING")]
    SimulatedAnnealing,
    #[serde(rename = "DAY_WISE_CROSSOVER")]
    Crossover,
}

impl fmt::Display for HeuristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HeuristicKind::Swap => "swap",
            HeuristicKind::Move => "move",
            HeuristicKind::SimulatedAnnealing => "simulated annealing",
            HeuristicKind::Crossover => "day-wise crossover",
        };
        f.write_str(name)
    }
}

/// Best of `k` individuals drawn uniformly with replacement.
pub fn tournament_select<'p, R: Rng + ?Sized>(
    population: &'p [Individual],
    k: usize,
    rng: &mut R,
) -> Option<&'p Individual> {
    let mut best: Option<&Individual> = None;
    for _ in 0..k.max(1) {
        let candidate = population.choose(rng)?;
        if best.is_none_or(|b| candidate.score() > b.score()) {
            best = Some(candidate);
        }
    }
    best
}

/// Child takes, per batch, the days before a random threshold in `0..6` from
/// `first` and the remaining days from `second`. The child is flagged as
/// unvalidated until repair has run.
pub fn day_wise_crossover<R: Rng + ?Sized>(
    first: &Individual,
    second: &Individual,
    rng: &mut R,
) -> Individual {
    let threshold: Day = rng.random_range(0..6);
    let mut child = TimetableGrid::default();
    for (batch_id, first_week) in &first.timetable.0 {
        let second_week = second.timetable.batch(batch_id);
        let mut days: Vec<Day> = first_week.keys().copied().collect();
        days.extend(second_week.into_iter().flat_map(|w| w.keys().copied()));
        days.sort_unstable();
        days.dedup();

        let week = child.0.entry(batch_id.clone()).or_default();
        for day in days {
            let source = if day < threshold {
                Some(first_week)
            } else {
                second_week
            };
            let cells = source.and_then(|w| w.get(&day)).cloned().unwrap_or_default();
            week.insert(day, cells);
        }
    }

    let mut individual = Individual::new(child);
    individual.metrics.hard_conflicts = 1;
    individual
}

type CellKey = (String, Day, Slot);

fn cell_key(assignment: &ClassAssignment) -> CellKey {
    (assignment.batch_id.clone(), assignment.day, assignment.slot)
}

/// Exchanges the (day, slot) of the assignments sitting at two cells.
///
/// Within one batch the two cells simply trade places. Across batches each
/// assignment must land on a free, unpinned cell of its own batch; otherwise
/// the grid is left as it was.
fn exchange(
    grid: &mut TimetableGrid,
    ctx: &SchedulingContext<'_>,
    (a_batch, a_day, a_slot): CellKey,
    (b_batch, b_day, b_slot): CellKey,
) -> bool {
    if (&a_batch, a_day, a_slot) == (&b_batch, b_day, b_slot)
        || ctx.is_pinned(a_day, a_slot, &a_batch)
        || ctx.is_pinned(b_day, b_slot, &b_batch)
    {
        return false;
    }
    if a_batch != b_batch {
        let a_target_taken =
            grid.get(&a_batch, b_day, b_slot).is_some() || ctx.is_pinned(b_day, b_slot, &a_batch);
        let b_target_taken =
            grid.get(&b_batch, a_day, a_slot).is_some() || ctx.is_pinned(a_day, a_slot, &b_batch);
        if a_target_taken || b_target_taken {
            return false;
        }
    }
    if grid.get(&a_batch, a_day, a_slot).is_none() || grid.get(&b_batch, b_day, b_slot).is_none() {
        return false;
    }

    let (Some(mut a), Some(mut b)) = (
        grid.remove(&a_batch, a_day, a_slot),
        grid.remove(&b_batch, b_day, b_slot),
    ) else {
        return false;
    };
    (a.day, a.slot) = (b_day, b_slot);
    (b.day, b.slot) = (a_day, a_slot);
    grid.insert(a);
    grid.insert(b);
    true
}

fn random_swap<R: Rng + ?Sized>(
    grid: &mut TimetableGrid,
    ctx: &SchedulingContext<'_>,
    rng: &mut R,
) -> bool {
    let assignments: Vec<&ClassAssignment> = grid.assignments().collect();
    if assignments.len() < 2 {
        return false;
    }
    let (Some(&a), Some(&b)) = (assignments.choose(rng), assignments.choose(rng)) else {
        return false;
    };
    let (a, b) = (cell_key(a), cell_key(b));
    exchange(grid, ctx, a, b)
}

/// Swaps the (day, slot) of two assignments named by id, under the same
/// pinned-safety rules as swap mutation. Returns whether the grid changed.
pub fn swap_by_id(
    grid: &mut TimetableGrid,
    ctx: &SchedulingContext<'_>,
    first_id: &str,
    second_id: &str,
) -> bool {
    let (Some(a), Some(b)) = (grid.find(first_id), grid.find(second_id)) else {
        return false;
    };
    let (a, b) = (cell_key(a), cell_key(b));
    exchange(grid, ctx, a, b)
}

/// With probability `rate`, swaps two random non-pinned assignments in place.
/// Returns whether the grid changed.
pub fn swap_mutate<R: Rng + ?Sized>(
    grid: &mut TimetableGrid,
    rate: f64,
    ctx: &SchedulingContext<'_>,
    rng: &mut R,
) -> bool {
    if rng.random::<f64>() > rate {
        return false;
    }
    random_swap(grid, ctx, rng)
}

/// With probability `rate`, relocates one random non-pinned assignment.
///
/// Up to `attempts` random (day, slot) targets are tried; a target is taken only
/// when the batch and every assigned faculty member are free there and some
/// suitable room is free, in which case the room is re-picked. When every
/// attempt fails the assignment goes back to where it was.
pub fn move_mutate<R: Rng + ?Sized>(
    grid: &mut TimetableGrid,
    rate: f64,
    attempts: usize,
    ctx: &SchedulingContext<'_>,
    rng: &mut R,
) -> Result<bool, EngineError> {
    if rng.random::<f64>() > rate {
        return Ok(false);
    }
    let Some(picked) = grid.flatten().choose(rng).cloned() else {
        return Ok(false);
    };
    if ctx.is_pinned(picked.day, picked.slot, &picked.batch_id) {
        return Ok(false);
    }
    let batch = ctx.batch(&picked.batch_id)?;
    let subject = ctx.subject(&picked.subject_id)?;

    let Some(original) = grid.remove(&picked.batch_id, picked.day, picked.slot) else {
        return Ok(false);
    };
    let occupancy = Occupancy::from_grid(grid);
    let days = ctx.working_days();

    for _ in 0..attempts {
        let Some(&day) = days.choose(rng) else {
            break;
        };
        let slot: Slot = rng.random_range(0..ctx.num_slots());
        if !occupancy.batch_free(&batch.id, day, slot) || ctx.is_pinned(day, slot, &batch.id) {
            continue;
        }
        let faculty_free = original
            .faculty_ids
            .iter()
            .all(|f| ctx.faculty_available(&occupancy, f, day, slot));
        if !faculty_free {
            continue;
        }
        if let Some(room) = ctx.pick_room(batch, subject, day, slot, &occupancy, rng) {
            grid.insert(ClassAssignment {
                room_id: room.id.clone(),
                day,
                slot,
                ..original
            });
            return Ok(true);
        }
    }

    grid.insert(original);
    Ok(false)
}

/// Local search by random pinned-safe swaps under a geometric cooling schedule.
///
/// Improving swaps are always kept; a worsening swap is kept with probability
/// `exp(delta / temperature)`. Returns the best state seen along the way.
pub fn simulated_annealing<R: Rng + ?Sized>(
    individual: &Individual,
    ctx: &SchedulingContext<'_>,
    weights: &FitnessWeights,
    schedule: &AnnealingConfig,
    rng: &mut R,
) -> Individual {
    let faculty = &ctx.reference.faculty;
    let mut current = individual.timetable.clone();
    let mut current_metrics = calculate_metrics(&current, faculty, weights);
    let mut best = Individual {
        timetable: current.clone(),
        metrics: current_metrics.clone(),
    };

    // A non-positive floor would never be reached once the temperature underflows to zero.
    let floor = schedule.min_temperature.max(f64::MIN_POSITIVE);
    let cooling = schedule.cooling_rate.clamp(0.0, 0.9999);
    let mut temperature = schedule.initial_temperature;
    while temperature.is_finite() && temperature > floor {
        for _ in 0..schedule.iterations_per_temperature.max(1) {
            let mut candidate = current.clone();
            if !random_swap(&mut candidate, ctx, rng) {
                continue;
            }
            let metrics = calculate_metrics(&candidate, faculty, weights);
            let delta = metrics.score - current_metrics.score;
            if delta > 0.0 || (delta / temperature).exp() > rng.random::<f64>() {
                if metrics.score > best.metrics.score {
                    best = Individual {
                        timetable: candidate.clone(),
                        metrics: metrics.clone(),
                    };
                }
                current = candidate;
                current_metrics = metrics;
            }
        }
        temperature *= cooling;
    }
    best
}

/// Cumulative-probability roulette over a phase's heuristic weights, falling
/// back to swap when the weights sum to less than the draw.
pub fn select_heuristic<R: Rng + ?Sized>(
    weights: &BTreeMap<HeuristicKind, f64>,
    rng: &mut R,
) -> HeuristicKind {
    let draw = rng.random::<f64>();
    let mut cumulative = 0.0;
    for (&kind, &probability) in weights {
        cumulative += probability;
        if draw <= cumulative {
            return kind;
        }
    }
    HeuristicKind::Swap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{ConflictChecker, count_hard_conflicts};
    use crate::context::fixtures::*;
    use crate::population::initialize_population;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn scored(score: f64) -> Individual {
        let mut individual = Individual::new(TimetableGrid::default());
        individual.metrics.score = score;
        individual
    }

    #[test]
    fn test_tournament_picks_best_of_sample() {
        let mut rng = SmallRng::seed_from_u64(1);
        let population = vec![scored(10.0), scored(500.0), scored(20.0)];
        // With a large sample the best individual is all but certain to be drawn.
        let winner = tournament_select(&population, 64, &mut rng).unwrap();
        assert_eq!(winner.score(), 500.0);
        assert!(tournament_select(&[], 5, &mut rng).is_none());
    }

    #[test]
    fn test_crossover_splits_by_day() {
        let mut first = TimetableGrid::default();
        let mut second = TimetableGrid::default();
        for day in 0..6 {
            first.insert(assignment(&format!("p1_{day}"), "B1", "T1", &["F1"], "R1", day, 0));
            second.insert(assignment(&format!("p2_{day}"), "B1", "T1", &["F1"], "R1", day, 1));
        }
        let (first, second) = (Individual::new(first), Individual::new(second));
        let mut rng = SmallRng::seed_from_u64(8);

        for _ in 0..20 {
            let child = day_wise_crossover(&first, &second, &mut rng);
            assert_eq!(child.metrics.hard_conflicts, 1);
            assert_eq!(child.timetable.len(), 6);
            let week = child.timetable.batch("B1").unwrap();
            let switch = (0..6)
                .find(|d| week[d].contains_key(&1))
                .unwrap_or(6);
            for day in 0..6 {
                let expected = if day < switch { 0 } else { 1 };
                assert!(week[&day].contains_key(&expected));
            }
        }
    }

    #[test]
    fn test_swap_moves_assignments_within_batch() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut grid = TimetableGrid::default();
        grid.insert(assignment("a", "B1", "T1", &["F1"], "R1", 0, 0));
        grid.insert(assignment("b", "B1", "T2", &["F2"], "R1", 3, 4));
        let mut rng = SmallRng::seed_from_u64(2);

        let mut changed = false;
        for _ in 0..50 {
            changed |= swap_mutate(&mut grid, 1.0, &ctx, &mut rng);
        }
        assert!(changed);
        assert_eq!(grid.len(), 2);
        let a = grid.find("a").unwrap();
        let b = grid.find("b").unwrap();
        assert!(matches!((a.day, a.slot), (0, 0) | (3, 4)));
        assert_ne!((a.day, a.slot), (b.day, b.slot));
    }

    #[test]
    fn test_swap_by_id_across_batches() {
        let reference = pinned_campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut grid = TimetableGrid::default();
        for pin in ctx.pinned_assignments() {
            grid.insert(pin);
        }
        grid.insert(assignment("x", "B1", "T2", &["F2"], "R1", 1, 0));
        grid.insert(assignment("y", "B2", "T1", &["F1"], "R1", 2, 3));
        grid.insert(assignment("z", "B2", "T2", &["F4"], "R1", 1, 0));

        // B2 already has "z" at x's cell.
        assert!(!swap_by_id(&mut grid, &ctx, "x", "y"));
        grid.remove("B2", 1, 0);
        assert!(swap_by_id(&mut grid, &ctx, "x", "y"));
        let (x, y) = (grid.find("x").unwrap(), grid.find("y").unwrap());
        assert_eq!((x.batch_id.as_str(), x.day, x.slot), ("B1", 2, 3));
        assert_eq!((y.batch_id.as_str(), y.day, y.slot), ("B2", 1, 0));

        assert!(!swap_by_id(&mut grid, &ctx, "pin_seminar_0_0", "x"));
        assert!(!swap_by_id(&mut grid, &ctx, "x", "missing"));
        assert_eq!(grid.len(), 4);
    }

    #[test]
    fn test_zero_rate_never_mutates() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(4);
        let mut grid = TimetableGrid::default();
        grid.insert(assignment("a", "B1", "T1", &["F1"], "R1", 0, 0));
        grid.insert(assignment("b", "B1", "T2", &["F2"], "R1", 1, 1));
        let before = grid.clone();
        for _ in 0..100 {
            assert!(!swap_mutate(&mut grid, 0.0, &ctx, &mut rng));
            assert!(!move_mutate(&mut grid, 0.0, 50, &ctx, &mut rng).unwrap());
        }
        assert_eq!(grid, before);
    }

    #[test]
    fn test_move_restores_when_no_target_fits() {
        let mut reference = campus();
        for faculty_id in ["F1", "F2"] {
            reference
                .constraints
                .faculty_availability
                .push(crate::data::FacultyAvailability {
                    faculty_id: faculty_id.into(),
                    availability: [(0, vec![])].into_iter().collect(),
                });
        }
        let ctx = SchedulingContext::new(&reference, &[0], 3).unwrap();
        let mut rng = SmallRng::seed_from_u64(6);

        // Both teachers have declared no free slot on the only working day.
        let mut grid = TimetableGrid::default();
        grid.insert(assignment("a", "B1", "T1", &["F1"], "R1", 0, 0));
        grid.insert(assignment("b", "B1", "T2", &["F2"], "R2", 0, 1));
        let before = grid.clone();
        for _ in 0..20 {
            assert!(!move_mutate(&mut grid, 1.0, 50, &ctx, &mut rng).unwrap());
        }
        assert_eq!(grid, before);
    }

    #[test]
    fn test_moves_keep_grid_clash_free() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let checker = ConflictChecker::new(&reference);
        let mut rng = SmallRng::seed_from_u64(17);
        let mut grid = initialize_population(1, &ctx.required_classes(), &ctx, None, &mut rng)
            .unwrap()
            .remove(0)
            .timetable;
        let placed = grid.len();

        for _ in 0..200 {
            move_mutate(&mut grid, 1.0, 50, &ctx, &mut rng).unwrap();
        }
        assert_eq!(grid.len(), placed);
        assert_eq!(count_hard_conflicts(&checker.check(&grid)), 0);
    }

    #[test]
    fn test_move_fails_loudly_on_unknown_subject() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(6);
        let mut grid = TimetableGrid::default();
        grid.insert(assignment("a", "B1", "GHOST", &["F1"], "R1", 0, 0));
        assert_eq!(
            move_mutate(&mut grid, 1.0, 50, &ctx, &mut rng),
            Err(EngineError::UnknownSubject("GHOST".into()))
        );
        assert!(grid.find("a").is_some());
    }

    #[test]
    fn test_annealing_never_returns_worse_than_start() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let weights = crate::data::GlobalConstraints::default().tuned_weights();
        let mut rng = SmallRng::seed_from_u64(13);
        let population =
            initialize_population(3, &ctx.required_classes(), &ctx, None, &mut rng).unwrap();

        for individual in &population {
            let start = calculate_metrics(&individual.timetable, &reference.faculty, &weights);
            let result = simulated_annealing(
                individual,
                &ctx,
                &weights,
                &AnnealingConfig::default(),
                &mut rng,
            );
            assert!(result.metrics.score >= start.score);
            assert_eq!(result.timetable.len(), individual.timetable.len());
        }
    }

    #[test]
    fn test_annealing_stops_without_a_positive_floor() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let weights = crate::data::GlobalConstraints::default().tuned_weights();
        let mut rng = SmallRng::seed_from_u64(17);
        let mut grid = TimetableGrid::default();
        grid.insert(assignment("a", "B1", "T1", &["F1"], "R1", 0, 0));
        grid.insert(assignment("b", "B1", "T2", &["F2"], "R1", 0, 2));
        let individual = Individual::new(grid);

        for schedule in [
            AnnealingConfig {
                min_temperature: -1.0,
                cooling_rate: 0.5,
                ..AnnealingConfig::default()
            },
            AnnealingConfig {
                initial_temperature: f64::INFINITY,
                ..AnnealingConfig::default()
            },
        ] {
            let result = simulated_annealing(&individual, &ctx, &weights, &schedule, &mut rng);
            assert_eq!(result.timetable.len(), 2);
        }
    }

    #[test]
    fn test_select_heuristic_roulette() {
        let mut rng = SmallRng::seed_from_u64(21);
        let only_move: BTreeMap<_, _> = [(HeuristicKind::Move, 1.0)].into_iter().collect();
        for _ in 0..100 {
            assert_eq!(select_heuristic(&only_move, &mut rng), HeuristicKind::Move);
        }
        assert_eq!(select_heuristic(&BTreeMap::new(), &mut rng), HeuristicKind::Swap);

        let split: BTreeMap<_, _> = [(HeuristicKind::Swap, 0.5), (HeuristicKind::Crossover, 0.5)]
            .into_iter()
            .collect();
        let crossovers = (0..1000)
            .filter(|_| select_heuristic(&split, &mut rng) == HeuristicKind::Crossover)
            .count();
        assert!((350..650).contains(&crossovers));
    }

    #[test]
    fn test_heuristic_wire_names() {
        assert_eq!(
            serde_json::to_string(&HeuristicKind::SimulatedAnnealing).unwrap(),
            "\"SIMULATED_ANNEALING\""
        );
        let weights: BTreeMap<HeuristicKind, f64> =
            serde_json::from_str(r#"{"SWAP_MUTATE":0.25,"DAY_WISE_CROSSOVER":0.75}"#).unwrap();
        assert_eq!(weights[&HeuristicKind::Crossover], 0.75);
    }

    #[test]
    fn test_pinned_cells_survive_many_operator_applications() {
        let reference = pinned_campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let weights = crate::data::GlobalConstraints::default().tuned_weights();
        let schedule = AnnealingConfig {
            initial_temperature: 10.0,
            cooling_rate: 0.5,
            ..AnnealingConfig::default()
        };
        let mut rng = SmallRng::seed_from_u64(99);
        let pins = ctx.pinned_assignments();
        let mut individual = initialize_population(1, &ctx.required_classes(), &ctx, None, &mut rng)
            .unwrap()
            .remove(0);

        for i in 0..1000 {
            match i % 3 {
                0 => {
                    swap_mutate(&mut individual.timetable, 1.0, &ctx, &mut rng);
                }
                1 => {
                    move_mutate(&mut individual.timetable, 1.0, 50, &ctx, &mut rng).unwrap();
                }
                _ => {
                    individual = simulated_annealing(&individual, &ctx, &weights, &schedule, &mut rng);
                }
            }
            for pin in &pins {
                assert_eq!(individual.timetable.get(&pin.batch_id, pin.day, pin.slot), Some(pin));
            }
        }
    }
}
