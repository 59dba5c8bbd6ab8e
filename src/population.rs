//! Population initialisation and greedy repair.

use log::{debug, trace};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::context::{Occupancy, RequiredClass, SchedulingContext};
use crate::data::{BatchId, Individual, SubjectId, TimetableGrid};
use crate::error::EngineError;

/// Builds `size` random, locally feasible individuals.
///
/// Individual 0 is the caller's base timetable when one is given. Every other
/// individual starts from the pinned events, then places the remaining required
/// classes at random (day, slot) cells, re-queueing a class whenever its batch,
/// faculty or a suitable room is busy. Classes still unplaced when the attempt
/// budget runs out are dropped from that individual.
pub fn initialize_population<R: Rng + ?Sized>(
    size: usize,
    required: &[RequiredClass],
    ctx: &SchedulingContext<'_>,
    base: Option<&TimetableGrid>,
    rng: &mut R,
) -> Result<Vec<Individual>, EngineError> {
    let mut population = Vec::with_capacity(size);
    for i in 0..size {
        let timetable = match (i, base) {
            (0, Some(base)) => base.clone(),
            _ => random_timetable(required, ctx, rng)?,
        };
        population.push(Individual::new(timetable));
    }
    Ok(population)
}

fn random_timetable<R: Rng + ?Sized>(
    required: &[RequiredClass],
    ctx: &SchedulingContext<'_>,
    rng: &mut R,
) -> Result<TimetableGrid, EngineError> {
    let batch_ids = ctx.reference.batches.iter().map(|b| &b.id);
    let mut grid = TimetableGrid::empty(batch_ids, ctx.working_days());
    let mut occupancy = Occupancy::default();

    let mut tally: BTreeMap<(BatchId, SubjectId), usize> = BTreeMap::new();
    for class in required {
        *tally
            .entry((class.batch_id.clone(), class.subject_id.clone()))
            .or_default() += 1;
    }

    for pinned in ctx.pinned_assignments() {
        let key = (pinned.batch_id.clone(), pinned.subject_id.clone());
        if let Some(count) = tally.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
        occupancy.occupy(&pinned);
        if let Some(displaced) = grid.insert(pinned) {
            occupancy.release(&displaced);
        }
    }

    let mut pending: Vec<RequiredClass> = tally
        .iter()
        .flat_map(|((batch_id, subject_id), &count)| {
            (0..count).map(move |_| RequiredClass {
                batch_id: batch_id.clone(),
                subject_id: subject_id.clone(),
            })
        })
        .collect();
    pending.shuffle(rng);

    let budget = pending.len() * ctx.num_slots() as usize * ctx.working_days().len();
    let mut queue = VecDeque::from(pending);
    let mut attempts = 0;
    while attempts < budget {
        let Some(class) = queue.pop_front() else {
            break;
        };
        attempts += 1;
        if ctx.try_place(&class, &mut grid, &mut occupancy, rng)?.is_none() {
            queue.push_back(class);
        }
    }

    if !queue.is_empty() {
        debug!(
            "Initializer dropped {} unplaceable classes after {} attempts.",
            queue.len(),
            attempts
        );
    }
    Ok(grid)
}

/// Restores exact per-(batch, subject) quotas and removes structural clashes.
///
/// Pinned assignments are kept untouched. Movable assignments are re-accepted in
/// grid order while their quota is open and their batch, room and faculty are
/// still free in that (day, slot); the rest are deleted. Each missing session then
/// gets up to `attempts` random placements and is left out if none succeeds.
pub fn greedy_repair<R: Rng + ?Sized>(
    individual: &mut Individual,
    ctx: &SchedulingContext<'_>,
    attempts: usize,
    rng: &mut R,
) -> Result<(), EngineError> {
    let grid = &mut individual.timetable;
    let (pinned, movable): (Vec<_>, Vec<_>) = grid
        .flatten()
        .into_iter()
        .partition(|a| ctx.is_pinned(a.day, a.slot, &a.batch_id));

    let mut placed: HashMap<(BatchId, SubjectId), u32> = HashMap::new();
    let mut occupancy = Occupancy::default();
    for assignment in &pinned {
        *placed
            .entry((assignment.batch_id.clone(), assignment.subject_id.clone()))
            .or_default() += 1;
        occupancy.occupy(assignment);
    }

    let mut removed = 0;
    for assignment in movable {
        let key = (assignment.batch_id.clone(), assignment.subject_id.clone());
        let quota = ctx.required_counts().get(&key).copied().unwrap_or(0);
        let count = placed.entry(key).or_default();
        if *count >= quota || occupancy.clashes(&assignment) {
            grid.remove(&assignment.batch_id, assignment.day, assignment.slot);
            removed += 1;
            continue;
        }
        *count += 1;
        occupancy.occupy(&assignment);
    }

    let mut missing = Vec::new();
    for ((batch_id, subject_id), &required) in ctx.required_counts() {
        let have = placed
            .get(&(batch_id.clone(), subject_id.clone()))
            .copied()
            .unwrap_or(0);
        for _ in have..required {
            missing.push(RequiredClass {
                batch_id: batch_id.clone(),
                subject_id: subject_id.clone(),
            });
        }
    }

    let mut unplaced = 0;
    for class in &missing {
        let mut done = false;
        for _ in 0..attempts {
            if ctx.try_place(class, grid, &mut occupancy, rng)?.is_some() {
                done = true;
                break;
            }
        }
        if !done {
            unplaced += 1;
        }
    }

    trace!(
        "Repair removed {} assignments, re-inserted {} of {} missing classes.",
        removed,
        missing.len() - unplaced,
        missing.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{ConflictChecker, count_hard_conflicts};
    use crate::context::fixtures::*;
    use crate::data::ClassAssignment;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn quota_of(grid: &TimetableGrid, batch: &str, subject: &str) -> usize {
        grid.assignments()
            .filter(|a| a.batch_id == batch && a.subject_id == subject)
            .count()
    }

    #[test]
    fn test_initialize_places_every_class_without_hard_conflicts() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let checker = ConflictChecker::new(&reference);
        let mut rng = SmallRng::seed_from_u64(42);

        let population =
            initialize_population(20, &ctx.required_classes(), &ctx, None, &mut rng).unwrap();
        assert_eq!(population.len(), 20);
        for individual in &population {
            assert_eq!(individual.timetable.len(), 12);
            assert_eq!(individual.metrics.score, 0.0);
            assert_eq!(count_hard_conflicts(&checker.check(&individual.timetable)), 0);
        }
    }

    #[test]
    fn test_initialize_keeps_pins_and_base() {
        let reference = pinned_campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut base = TimetableGrid::default();
        base.insert(assignment("kept", "B1", "T2", &["F2"], "R1", 4, 4));

        let population =
            initialize_population(5, &ctx.required_classes(), &ctx, Some(&base), &mut rng)
                .unwrap();
        assert_eq!(population[0].timetable, base);
        for individual in &population[1..] {
            let seminar = individual.timetable.get("B1", 0, 0).unwrap();
            assert_eq!(seminar.id, "pin_seminar_0_0");
            assert_eq!(individual.timetable.get("B1", 0, 1).unwrap().faculty_ids, vec!["F3"]);
            // Two pinned T1 cells already satisfy B1's T1 quota.
            assert_eq!(quota_of(&individual.timetable, "B1", "T1"), 2);
        }
    }

    #[test]
    fn test_pins_count_towards_quotas() {
        let reference = pinned_campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(19);

        let population =
            initialize_population(10, &ctx.required_classes(), &ctx, None, &mut rng).unwrap();
        for individual in &population {
            for ((batch, subject), &required) in ctx.required_counts() {
                assert_eq!(quota_of(&individual.timetable, batch, subject), required as usize);
            }
            assert_eq!(individual.timetable.len(), 12);
        }
    }

    #[test]
    fn test_repair_restores_quotas_and_removes_clashes() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let checker = ConflictChecker::new(&reference);
        let mut rng = SmallRng::seed_from_u64(11);

        let mut grid = TimetableGrid::default();
        // Three T1 sessions for B1 (one too many) and a room clash with B2.
        grid.insert(assignment("a", "B1", "T1", &["F1"], "R1", 0, 0));
        grid.insert(assignment("b", "B1", "T1", &["F1"], "R1", 0, 1));
        grid.insert(assignment("c", "B1", "T1", &["F3"], "R1", 0, 2));
        grid.insert(assignment("d", "B2", "T2", &["F2"], "R1", 0, 0));
        let mut individual = Individual::new(grid);

        greedy_repair(&mut individual, &ctx, 100, &mut rng).unwrap();
        let grid = &individual.timetable;
        for ((batch, subject), &required) in ctx.required_counts() {
            assert_eq!(quota_of(grid, batch, subject), required as usize);
        }
        assert!(grid.find("a").is_some());
        assert!(grid.find("c").is_none());
        assert!(grid.find("d").is_none());
        assert_eq!(count_hard_conflicts(&checker.check(grid)), 0);
    }

    #[test]
    fn test_repair_never_touches_pins() {
        let reference = pinned_campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        let mut population =
            initialize_population(3, &ctx.required_classes(), &ctx, None, &mut rng).unwrap();
        let pins: Vec<ClassAssignment> = ctx.pinned_assignments();

        for individual in &mut population {
            greedy_repair(individual, &ctx, 100, &mut rng).unwrap();
            for pin in &pins {
                assert_eq!(individual.timetable.get(&pin.batch_id, pin.day, pin.slot), Some(pin));
            }
        }
    }

    #[test]
    fn test_repair_leaves_unplaceable_classes_out() {
        let mut reference = campus();
        // No lab at all: practicals can never be placed.
        reference.rooms.retain(|r| r.id != "L1");
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        let mut individual = Individual::new(TimetableGrid::default());

        greedy_repair(&mut individual, &ctx, 10, &mut rng).unwrap();
        assert_eq!(quota_of(&individual.timetable, "B1", "P1"), 0);
        assert_eq!(quota_of(&individual.timetable, "B1", "T1"), 2);
        assert_eq!(individual.timetable.len(), 8);
    }

    #[test]
    fn test_repair_drops_unrequired_subjects() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        let mut grid = TimetableGrid::default();
        grid.insert(assignment("ghost", "B1", "GHOST", &["F1"], "R1", 0, 0));
        let mut individual = Individual::new(grid);

        greedy_repair(&mut individual, &ctx, 100, &mut rng).unwrap();
        assert!(individual.timetable.find("ghost").is_none());
    }
}
