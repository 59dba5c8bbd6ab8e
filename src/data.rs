use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::EngineConfig;

// Type aliases for clarity
pub type SubjectId = String;
pub type FacultyId = String;
pub type RoomId = String;
pub type BatchId = String;
pub type AssignmentId = String;
pub type Day = u32;
pub type Slot = u32;

/// Upper bound on periods per day: one-minute periods around the clock.
pub const MAX_SLOTS_PER_DAY: Slot = 24 * 60;

/// Teaching mode of a subject; decides the room type and how many teachers a session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SubjectType {
    Theory,
    Practical,
    Workshop,
}

impl SubjectType {
    /// Practical (lab) sessions are co-taught by two faculty members.
    pub fn required_faculty(self) -> usize {
        match self {
            SubjectType::Practical => 2,
            SubjectType::Theory | SubjectType::Workshop => 1,
        }
    }

    pub fn suitable_room(self) -> RoomType {
        match self {
            SubjectType::Theory => RoomType::LectureHall,
            SubjectType::Practical => RoomType::Lab,
            SubjectType::Workshop => RoomType::Workshop,
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubjectType::Theory => "Theory",
            SubjectType::Practical => "Practical",
            SubjectType::Workshop => "Workshop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: SubjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(rename = "type")]
    pub kind: SubjectType,
    #[serde(default)]
    pub credits: u32,
    /// Number of sessions that must be placed every week.
    pub hours_per_week: u32,
}

/// A teacher, the subjects they are qualified for and optionally the slots they prefer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Faculty {
    pub id: FacultyId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject_ids: Vec<SubjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_slots: Option<BTreeMap<Day, Vec<Slot>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RoomType {
    #[serde(rename = "Lecture Hall", alias = "LectureHall")]
    LectureHall,
    Lab,
    Workshop,
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomType::LectureHall => "Lecture Hall",
            RoomType::Lab => "Lab",
            RoomType::Workshop => "Workshop",
        };
        f.write_str(name)
    }
}

/// Represents a physical room with a given capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    #[serde(default)]
    pub name: String,
    pub capacity: u32,
    #[serde(rename = "type")]
    pub kind: RoomType,
}

/// A cohort of students that attends the same classes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub department_id: String,
    #[serde(default)]
    pub semester: u32,
    pub student_count: u32,
    #[serde(default)]
    pub subject_ids: Vec<SubjectId>,
    /// When non-empty, the batch may only be taught in these rooms.
    #[serde(default)]
    pub allocated_room_ids: Vec<RoomId>,
}

impl Batch {
    pub fn allows_room(&self, room_id: &str) -> bool {
        self.allocated_room_ids.is_empty() || self.allocated_room_ids.iter().any(|r| r == room_id)
    }
}

/// Explicit (batch, subject) -> faculty rule. Overrides qualification when non-empty.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyAllocation {
    #[serde(default)]
    pub id: String,
    pub batch_id: BatchId,
    pub subject_id: SubjectId,
    pub faculty_ids: Vec<FacultyId>,
}

/// A recurring fixed event that the search must never move or overwrite.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedAssignment {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub subject_id: SubjectId,
    pub faculty_id: FacultyId,
    pub room_id: RoomId,
    pub batch_id: BatchId,
    pub days: Vec<Day>,
    pub start_slots: Vec<Slot>,
    /// Length of each occurrence, in slots.
    pub duration: u32,
}

impl PinnedAssignment {
    /// Every (day, slot) cell this pin occupies below `num_slots`, in declaration order.
    /// An occurrence stops at the end of the day.
    pub fn cells(&self, num_slots: Slot) -> impl Iterator<Item = (Day, Slot)> + '_ {
        self.days.iter().flat_map(move |&day| {
            self.start_slots.iter().flat_map(move |&start| {
                (0..self.duration)
                    .map_while(move |offset| start.checked_add(offset))
                    .take_while(move |&slot| slot < num_slots)
                    .map(move |slot| (day, slot))
            })
        })
    }
}

/// Per-faculty availability windows. A day without an entry is fully available.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyAvailability {
    pub faculty_id: FacultyId,
    #[serde(default)]
    pub availability: BTreeMap<Day, Vec<Slot>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedLeave {
    pub id: String,
    pub faculty_id: FacultyId,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    pub id: String,
    pub original_assignment_id: AssignmentId,
    pub original_faculty_id: FacultyId,
    pub substitute_faculty_id: FacultyId,
    pub substitute_subject_id: SubjectId,
    pub room_id: RoomId,
    pub batch_id: BatchId,
    pub day: Day,
    pub slot: Slot,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub created_at: String,
}

/// Scheduling constraints. Leaves and substitutions are carried for consumers of the
/// output; the search itself only reads pins and availability.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default)]
    pub pinned_assignments: Vec<PinnedAssignment>,
    #[serde(default)]
    pub planned_leaves: Vec<PlannedLeave>,
    #[serde(default)]
    pub faculty_availability: Vec<FacultyAvailability>,
    #[serde(default)]
    pub substitutions: Vec<Substitution>,
}

/// A single placed class: the atomic unit of a timetable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAssignment {
    pub id: AssignmentId,
    pub subject_id: SubjectId,
    pub faculty_ids: Vec<FacultyId>,
    pub room_id: RoomId,
    pub batch_id: BatchId,
    pub day: Day,
    pub slot: Slot,
}

/// One batch's week: day -> slot -> assignment.
pub type BatchGrid = BTreeMap<Day, BTreeMap<Slot, ClassAssignment>>;

/// Master timetable: batch -> day -> slot -> assignment.
///
/// Ordered maps keep iteration (and therefore seeded runs) reproducible, and
/// structural equality doubles as the de-duplication signature for candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TimetableGrid(pub BTreeMap<BatchId, BatchGrid>);

impl TimetableGrid {
    /// Empty grid with a sub-grid for every batch and working day.
    pub fn empty<'a>(batch_ids: impl IntoIterator<Item = &'a BatchId>, days: &[Day]) -> Self {
        let grid = batch_ids
            .into_iter()
            .map(|id| {
                let week = days.iter().map(|&d| (d, BTreeMap::new())).collect();
                (id.clone(), week)
            })
            .collect();
        TimetableGrid(grid)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &ClassAssignment> {
        self.0
            .values()
            .flat_map(|week| week.values().flat_map(|day| day.values()))
    }

    /// Flattened copy of every placed class, in batch/day/slot order.
    pub fn flatten(&self) -> Vec<ClassAssignment> {
        self.assignments().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.assignments().count()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments().next().is_none()
    }

    pub fn get(&self, batch_id: &str, day: Day, slot: Slot) -> Option<&ClassAssignment> {
        self.0.get(batch_id)?.get(&day)?.get(&slot)
    }

    pub fn find(&self, id: &str) -> Option<&ClassAssignment> {
        self.assignments().find(|a| a.id == id)
    }

    /// Places the assignment at its own (batch, day, slot), returning whatever it displaced.
    pub fn insert(&mut self, assignment: ClassAssignment) -> Option<ClassAssignment> {
        self.0
            .entry(assignment.batch_id.clone())
            .or_default()
            .entry(assignment.day)
            .or_default()
            .insert(assignment.slot, assignment)
    }

    pub fn remove(&mut self, batch_id: &str, day: Day, slot: Slot) -> Option<ClassAssignment> {
        self.0.get_mut(batch_id)?.get_mut(&day)?.remove(&slot)
    }

    pub fn batch(&self, batch_id: &str) -> Option<&BatchGrid> {
        self.0.get(batch_id)
    }
}

/// Quality summary of a timetable. Derived from a grid, never stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableMetrics {
    pub score: f64,
    pub hard_conflicts: u32,
    pub student_gaps: u32,
    pub faculty_gaps: u32,
    pub faculty_workload_distribution: f64,
    pub preference_violations: u32,
}

/// Penalty coefficients actually applied by the fitness function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitnessWeights {
    pub student_gap: f64,
    pub faculty_gap: f64,
    pub workload: f64,
    pub preference: f64,
}

/// User-set penalty weights plus their externally tunable counterparts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConstraints {
    pub student_gap_weight: f64,
    pub faculty_gap_weight: f64,
    pub faculty_workload_distribution_weight: f64,
    pub faculty_preference_weight: f64,
    #[serde(default)]
    pub ai_student_gap_weight: Option<f64>,
    #[serde(default)]
    pub ai_faculty_gap_weight: Option<f64>,
    #[serde(default)]
    pub ai_faculty_workload_distribution_weight: Option<f64>,
    #[serde(default)]
    pub ai_faculty_preference_weight: Option<f64>,
}

impl GlobalConstraints {
    /// Tunable weights, each falling back to its base value when no tuning has been stored.
    pub fn tuned_weights(&self) -> FitnessWeights {
        FitnessWeights {
            student_gap: self.ai_student_gap_weight.unwrap_or(self.student_gap_weight),
            faculty_gap: self.ai_faculty_gap_weight.unwrap_or(self.faculty_gap_weight),
            workload: self
                .ai_faculty_workload_distribution_weight
                .unwrap_or(self.faculty_workload_distribution_weight),
            preference: self
                .ai_faculty_preference_weight
                .unwrap_or(self.faculty_preference_weight),
        }
    }

}

impl Default for GlobalConstraints {
    fn default() -> Self {
        Self {
            student_gap_weight: 5.0,
            faculty_gap_weight: 5.0,
            faculty_workload_distribution_weight: 10.0,
            faculty_preference_weight: 2.0,
            ai_student_gap_weight: None,
            ai_faculty_gap_weight: None,
            ai_faculty_workload_distribution_weight: None,
            ai_faculty_preference_weight: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakPeriod {
    #[serde(default)]
    pub name: String,
    pub start_time: String,
    pub end_time: String,
}

/// Daily slot geometry: times are "HH:mm", the period length is in minutes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableSettings {
    pub college_start_time: String,
    pub college_end_time: String,
    pub period_duration: u32,
    #[serde(default)]
    pub breaks: Vec<BreakPeriod>,
    #[serde(default)]
    pub working_days: Vec<Day>,
}

/// Reference collections shared by the checker, the diagnostics and the search.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceData {
    pub batches: Vec<Batch>,
    #[serde(rename = "allSubjects")]
    pub subjects: Vec<Subject>,
    #[serde(rename = "allFaculty")]
    pub faculty: Vec<Faculty>,
    #[serde(rename = "allRooms")]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub faculty_allocations: Vec<FacultyAllocation>,
}

/// The complete input snapshot for one optimisation run.
///
/// The reference collections sit at the top level on the wire. Deserialising
/// goes through `SchedulerInputWire` because flattened maps lose integer keys
/// such as the day indices of availability windows.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", from = "SchedulerInputWire")]
pub struct SchedulerInput {
    #[serde(flatten)]
    pub reference: ReferenceData,
    #[serde(default)]
    pub global_constraints: GlobalConstraints,
    /// Names of all week days, indexed by `Day`.
    #[serde(default)]
    pub days: Vec<String>,
    pub working_days_indices: Vec<Day>,
    pub timetable_settings: TimetableSettings,
    pub candidate_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_timetable: Option<TimetableGrid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerInputWire {
    batches: Vec<Batch>,
    all_subjects: Vec<Subject>,
    all_faculty: Vec<Faculty>,
    all_rooms: Vec<Room>,
    #[serde(default)]
    constraints: Constraints,
    #[serde(default)]
    faculty_allocations: Vec<FacultyAllocation>,
    #[serde(default)]
    global_constraints: GlobalConstraints,
    #[serde(default)]
    days: Vec<String>,
    working_days_indices: Vec<Day>,
    timetable_settings: TimetableSettings,
    candidate_count: usize,
    #[serde(default)]
    base_timetable: Option<TimetableGrid>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    engine: Option<EngineConfig>,
}

impl From<SchedulerInputWire> for SchedulerInput {
    fn from(wire: SchedulerInputWire) -> Self {
        Self {
            reference: ReferenceData {
                batches: wire.batches,
                subjects: wire.all_subjects,
                faculty: wire.all_faculty,
                rooms: wire.all_rooms,
                constraints: wire.constraints,
                faculty_allocations: wire.faculty_allocations,
            },
            global_constraints: wire.global_constraints,
            days: wire.days,
            working_days_indices: wire.working_days_indices,
            timetable_settings: wire.timetable_settings,
            candidate_count: wire.candidate_count,
            base_timetable: wire.base_timetable,
            seed: wire.seed,
            engine: wire.engine,
        }
    }
}

/// A candidate timetable together with its fitness.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Individual {
    pub timetable: TimetableGrid,
    pub metrics: TimetableMetrics,
}

impl Individual {
    pub fn new(timetable: TimetableGrid) -> Self {
        Self {
            timetable,
            metrics: TimetableMetrics::default(),
        }
    }

    pub fn score(&self) -> f64 {
        self.metrics.score
    }
}
