//! Soft-constraint scoring. Higher is better; a timetable with no penalties scores 1000.

use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

use crate::data::{Day, Faculty, FitnessWeights, Slot, TimetableGrid, TimetableMetrics};

pub const MAX_SCORE: f64 = 1000.0;

/// Idle slots between the first and last occupied slot of a day.
fn gaps_in_day(slots: &mut [Slot]) -> u32 {
    slots.sort_unstable();
    slots
        .iter()
        .tuple_windows()
        .map(|(a, b)| b.saturating_sub(*a).saturating_sub(1))
        .sum()
}

/// Population standard deviation of weekly hours. Zero unless at least two
/// faculty members actually teach.
fn workload_spread(workloads: &[u32]) -> f64 {
    if workloads.iter().filter(|&&h| h > 0).count() <= 1 {
        return 0.0;
    }
    let n = workloads.len() as f64;
    let mean = workloads.iter().map(|&h| h as f64).sum::<f64>() / n;
    let variance = workloads
        .iter()
        .map(|&h| (h as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt()
}

/// Scores a grid from gaps, workload spread and preference violations.
pub fn calculate_metrics(
    grid: &TimetableGrid,
    faculty: &[Faculty],
    weights: &FitnessWeights,
) -> TimetableMetrics {
    let mut student_gaps = 0;
    for week in grid.0.values() {
        for day in week.values() {
            let mut slots: Vec<Slot> = day.keys().copied().collect();
            student_gaps += gaps_in_day(&mut slots);
        }
    }

    let mut teaching: HashMap<&str, BTreeMap<Day, Vec<Slot>>> = HashMap::new();
    for assignment in grid.assignments() {
        for faculty_id in &assignment.faculty_ids {
            teaching
                .entry(faculty_id.as_str())
                .or_default()
                .entry(assignment.day)
                .or_default()
                .push(assignment.slot);
        }
    }

    let mut faculty_gaps = 0;
    let mut preference_violations = 0;
    let mut workloads = Vec::with_capacity(faculty.len());
    for member in faculty {
        let mut hours = 0;
        if let Some(days) = teaching.get_mut(member.id.as_str()) {
            for (day, slots) in days.iter_mut() {
                hours += slots.len() as u32;
                faculty_gaps += gaps_in_day(slots);
                if let Some(preferred) = &member.preferred_slots {
                    let allowed = preferred.get(day);
                    preference_violations += slots
                        .iter()
                        .filter(|&&s| !allowed.is_some_and(|p| p.contains(&s)))
                        .count() as u32;
                }
            }
        }
        workloads.push(hours);
    }
    let faculty_workload_distribution = workload_spread(&workloads);

    let score = MAX_SCORE
        - student_gaps as f64 * weights.student_gap
        - faculty_gaps as f64 * weights.faculty_gap
        - faculty_workload_distribution * weights.workload
        - preference_violations as f64 * weights.preference;

    TimetableMetrics {
        score: score.max(0.0),
        hard_conflicts: 0,
        student_gaps,
        faculty_gaps,
        faculty_workload_distribution,
        preference_violations,
    }
}
