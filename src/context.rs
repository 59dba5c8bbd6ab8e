//! Indexed view of the input snapshot used by the initializer, the operators and repair.

use log::warn;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::data::{
    Batch, BatchId, ClassAssignment, Day, Faculty, FacultyId, ReferenceData, Room, SchedulerInput,
    Slot, Subject, SubjectId, TimetableGrid,
};
use crate::error::EngineError;
use crate::oracle::ProblemSummary;
use crate::slots::generate_time_slots;

/// (day, slot, batch) cells owned by pinned events.
pub type PinnedLocations = HashSet<(Day, Slot, BatchId)>;

/// One weekly session that has to be placed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequiredClass {
    pub batch_id: BatchId,
    pub subject_id: SubjectId,
}

/// Generates a fresh assignment id from the run's random stream.
pub fn new_assignment_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("asgn_{:012x}", rng.random::<u64>() & 0xffff_ffff_ffff)
}

#[derive(Debug, Clone, Default)]
struct CellUse {
    batches: Vec<BatchId>,
    rooms: Vec<String>,
    faculty: Vec<FacultyId>,
}

fn release_one(list: &mut Vec<String>, id: &str) {
    if let Some(pos) = list.iter().position(|x| x == id) {
        list.swap_remove(pos);
    }
}

/// Which batches, rooms and faculty are busy in each (day, slot).
///
/// This is the cheap occupancy test used while building and repairing grids;
/// the full rule set lives in the checker.
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    cells: HashMap<(Day, Slot), CellUse>,
}

impl Occupancy {
    pub fn from_grid(grid: &TimetableGrid) -> Self {
        let mut occupancy = Self::default();
        for assignment in grid.assignments() {
            occupancy.occupy(assignment);
        }
        occupancy
    }

    pub fn occupy(&mut self, assignment: &ClassAssignment) {
        let cell = self.cells.entry((assignment.day, assignment.slot)).or_default();
        cell.batches.push(assignment.batch_id.clone());
        cell.rooms.push(assignment.room_id.clone());
        cell.faculty.extend(assignment.faculty_ids.iter().cloned());
    }

    pub fn release(&mut self, assignment: &ClassAssignment) {
        if let Some(cell) = self.cells.get_mut(&(assignment.day, assignment.slot)) {
            release_one(&mut cell.batches, &assignment.batch_id);
            release_one(&mut cell.rooms, &assignment.room_id);
            for faculty_id in &assignment.faculty_ids {
                release_one(&mut cell.faculty, faculty_id);
            }
        }
    }

    pub fn batch_free(&self, batch_id: &str, day: Day, slot: Slot) -> bool {
        self.cells
            .get(&(day, slot))
            .is_none_or(|c| !c.batches.iter().any(|b| b == batch_id))
    }

    pub fn room_free(&self, room_id: &str, day: Day, slot: Slot) -> bool {
        self.cells
            .get(&(day, slot))
            .is_none_or(|c| !c.rooms.iter().any(|r| r == room_id))
    }

    pub fn faculty_free(&self, faculty_id: &str, day: Day, slot: Slot) -> bool {
        self.cells
            .get(&(day, slot))
            .is_none_or(|c| !c.faculty.iter().any(|f| f == faculty_id))
    }

    /// True when the assignment's batch, room or any of its faculty is already taken.
    pub fn clashes(&self, assignment: &ClassAssignment) -> bool {
        let (day, slot) = (assignment.day, assignment.slot);
        !self.batch_free(&assignment.batch_id, day, slot)
            || !self.room_free(&assignment.room_id, day, slot)
            || assignment
                .faculty_ids
                .iter()
                .any(|f| !self.faculty_free(f, day, slot))
    }
}

/// Read-only lookups over one input snapshot, shared by every engine call of a run.
pub struct SchedulingContext<'a> {
    pub reference: &'a ReferenceData,
    subjects: HashMap<&'a str, &'a Subject>,
    batches: HashMap<&'a str, &'a Batch>,
    allocations: HashMap<(&'a str, &'a str), &'a [FacultyId]>,
    availability: HashMap<&'a str, &'a BTreeMap<Day, Vec<Slot>>>,
    pinned: PinnedLocations,
    required: BTreeMap<(BatchId, SubjectId), u32>,
    working_days: Vec<Day>,
    num_slots: Slot,
}

impl<'a> SchedulingContext<'a> {
    pub fn new(
        reference: &'a ReferenceData,
        working_days: &[Day],
        num_slots: Slot,
    ) -> Result<Self, EngineError> {
        if working_days.is_empty() {
            return Err(EngineError::NoWorkingDays);
        }
        if num_slots == 0 {
            return Err(EngineError::NoTimeSlots);
        }

        let subjects: HashMap<&str, &Subject> =
            reference.subjects.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut required = BTreeMap::new();
        for batch in &reference.batches {
            for subject_id in &batch.subject_ids {
                match subjects.get(subject_id.as_str()) {
                    Some(subject) => {
                        required.insert((batch.id.clone(), subject_id.clone()), subject.hours_per_week);
                    }
                    None => warn!(
                        "Batch {} requires unknown subject {}; it will not be scheduled.",
                        batch.id, subject_id
                    ),
                }
            }
        }

        let pinned = reference
            .constraints
            .pinned_assignments
            .iter()
            .flat_map(|pin| {
                pin.cells(num_slots)
                    .map(move |(day, slot)| (day, slot, pin.batch_id.clone()))
            })
            .collect();

        Ok(Self {
            reference,
            subjects,
            batches: reference.batches.iter().map(|b| (b.id.as_str(), b)).collect(),
            allocations: reference
                .faculty_allocations
                .iter()
                .map(|a| ((a.batch_id.as_str(), a.subject_id.as_str()), a.faculty_ids.as_slice()))
                .collect(),
            availability: reference
                .constraints
                .faculty_availability
                .iter()
                .map(|fa| (fa.faculty_id.as_str(), &fa.availability))
                .collect(),
            pinned,
            required,
            working_days: working_days.to_vec(),
            num_slots,
        })
    }

    /// Builds the context for a run, deriving the slot count from the timetable settings.
    pub fn from_input(input: &'a SchedulerInput) -> Result<Self, EngineError> {
        let num_slots = generate_time_slots(&input.timetable_settings).len() as Slot;
        Self::new(&input.reference, &input.working_days_indices, num_slots)
    }

    pub fn working_days(&self) -> &[Day] {
        &self.working_days
    }

    pub fn num_slots(&self) -> Slot {
        self.num_slots
    }

    pub fn is_pinned(&self, day: Day, slot: Slot, batch_id: &str) -> bool {
        self.pinned.contains(&(day, slot, batch_id.to_string()))
    }

    pub fn batch(&self, id: &str) -> Result<&'a Batch, EngineError> {
        self.batches
            .get(id)
            .copied()
            .ok_or_else(|| EngineError::UnknownBatch(id.to_string()))
    }

    pub fn subject(&self, id: &str) -> Result<&'a Subject, EngineError> {
        self.subjects
            .get(id)
            .copied()
            .ok_or_else(|| EngineError::UnknownSubject(id.to_string()))
    }

    /// Required weekly session count per (batch, subject).
    pub fn required_counts(&self) -> &BTreeMap<(BatchId, SubjectId), u32> {
        &self.required
    }

    /// One entry per weekly session to place.
    pub fn required_classes(&self) -> Vec<RequiredClass> {
        self.required
            .iter()
            .flat_map(|((batch_id, subject_id), &count)| {
                (0..count).map(move |_| RequiredClass {
                    batch_id: batch_id.clone(),
                    subject_id: subject_id.clone(),
                })
            })
            .collect()
    }

    pub fn problem_summary(&self) -> ProblemSummary {
        ProblemSummary {
            num_batches: self.reference.batches.len(),
            num_classes: self.required.values().map(|&c| c as usize).sum(),
            num_faculty: self.reference.faculty.len(),
            num_rooms: self.reference.rooms.len(),
            num_constraints: self.reference.constraints.pinned_assignments.len(),
        }
    }

    /// Pinned events expanded into fixed assignments, clipped to the day's slots.
    pub fn pinned_assignments(&self) -> Vec<ClassAssignment> {
        self.reference
            .constraints
            .pinned_assignments
            .iter()
            .flat_map(|pin| {
                pin.cells(self.num_slots).map(move |(day, slot)| ClassAssignment {
                        id: format!("pin_{}_{}_{}", pin.id, day, slot),
                        subject_id: pin.subject_id.clone(),
                        faculty_ids: vec![pin.faculty_id.clone()],
                        room_id: pin.room_id.clone(),
                        batch_id: pin.batch_id.clone(),
                        day,
                        slot,
                    })
            })
            .collect()
    }

    /// Faculty allowed to teach (batch, subject): the explicit allocation when one
    /// exists and is non-empty, otherwise everyone qualified for the subject.
    pub fn faculty_candidates(&self, batch_id: &str, subject_id: &str) -> Vec<&'a Faculty> {
        match self.allocations.get(&(batch_id, subject_id)) {
            Some(ids) if !ids.is_empty() => self
                .reference
                .faculty
                .iter()
                .filter(|f| ids.contains(&f.id))
                .collect(),
            _ => self
                .reference
                .faculty
                .iter()
                .filter(|f| f.subject_ids.iter().any(|s| s == subject_id))
                .collect(),
        }
    }

    /// Declared availability window only; absence of an entry for the day means free.
    pub fn within_availability(&self, faculty_id: &str, day: Day, slot: Slot) -> bool {
        self.availability
            .get(faculty_id)
            .and_then(|days| days.get(&day))
            .is_none_or(|slots| slots.contains(&slot))
    }

    pub fn faculty_available(
        &self,
        occupancy: &Occupancy,
        faculty_id: &str,
        day: Day,
        slot: Slot,
    ) -> bool {
        occupancy.faculty_free(faculty_id, day, slot) && self.within_availability(faculty_id, day, slot)
    }

    /// Capacity, room type and the batch's allowed-room subset.
    pub fn room_suitable(&self, room: &Room, batch: &Batch, subject: &Subject) -> bool {
        room.capacity >= batch.student_count
            && room.kind == subject.kind.suitable_room()
            && batch.allows_room(&room.id)
    }

    /// Uniform pick among the rooms that are suitable and free at (day, slot).
    pub fn pick_room<R: Rng + ?Sized>(
        &self,
        batch: &Batch,
        subject: &Subject,
        day: Day,
        slot: Slot,
        occupancy: &Occupancy,
        rng: &mut R,
    ) -> Option<&'a Room> {
        let rooms: Vec<&'a Room> = self
            .reference
            .rooms
            .iter()
            .filter(|r| self.room_suitable(r, batch, subject) && occupancy.room_free(&r.id, day, slot))
            .collect();
        rooms.choose(rng).copied()
    }

    /// Takes the first candidates free at (day, slot), needing two for practicals.
    fn pick_faculty(
        &self,
        batch: &Batch,
        subject: &Subject,
        day: Day,
        slot: Slot,
        occupancy: &Occupancy,
    ) -> Option<Vec<FacultyId>> {
        let needed = subject.kind.required_faculty();
        let chosen: Vec<FacultyId> = self
            .faculty_candidates(&batch.id, &subject.id)
            .into_iter()
            .filter(|f| self.faculty_available(occupancy, &f.id, day, slot))
            .take(needed)
            .map(|f| f.id.clone())
            .collect();
        (chosen.len() == needed).then_some(chosen)
    }

    /// One random placement attempt for a required class.
    ///
    /// On success the class is written into both the grid and the occupancy index.
    /// `Ok(None)` means this attempt found no free (day, slot, faculty, room).
    pub fn try_place<R: Rng + ?Sized>(
        &self,
        class: &RequiredClass,
        grid: &mut TimetableGrid,
        occupancy: &mut Occupancy,
        rng: &mut R,
    ) -> Result<Option<ClassAssignment>, EngineError> {
        let batch = self.batch(&class.batch_id)?;
        let subject = self.subject(&class.subject_id)?;

        let Some(&day) = self.working_days.choose(rng) else {
            return Ok(None);
        };
        let slot = rng.random_range(0..self.num_slots);

        if !occupancy.batch_free(&batch.id, day, slot) || self.is_pinned(day, slot, &batch.id) {
            return Ok(None);
        }
        let Some(faculty_ids) = self.pick_faculty(batch, subject, day, slot, occupancy) else {
            return Ok(None);
        };
        let Some(room) = self.pick_room(batch, subject, day, slot, occupancy, rng) else {
            return Ok(None);
        };

        let assignment = ClassAssignment {
            id: new_assignment_id(rng),
            subject_id: subject.id.clone(),
            faculty_ids,
            room_id: room.id.clone(),
            batch_id: batch.id.clone(),
            day,
            slot,
        };
        occupancy.occupy(&assignment);
        grid.insert(assignment.clone());
        Ok(Some(assignment))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::data::FacultyAllocation;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_required_classes_expand_hours() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        assert_eq!(ctx.required_classes().len(), 12);
        assert_eq!(ctx.required_counts()[&("B1".to_string(), "P1".to_string())], 2);
        assert_eq!(ctx.problem_summary().num_classes, 12);
    }

    #[test]
    fn test_pinned_cells_are_clipped_to_the_day() {
        let mut reference = pinned_campus();
        reference.constraints.pinned_assignments[0].start_slots = vec![3];
        reference.constraints.pinned_assignments[0].duration = u32::MAX;
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let slots: Vec<Slot> = ctx.pinned_assignments().iter().map(|a| a.slot).collect();
        assert_eq!(slots, vec![3, 4]);
        assert!(ctx.is_pinned(0, 4, "B1"));
        assert!(!ctx.is_pinned(0, 5, "B1"));
    }

    #[test]
    fn test_unknown_required_subject_is_skipped() {
        let mut reference = campus();
        reference.batches[0].subject_ids.push("GHOST".into());
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        assert_eq!(ctx.required_classes().len(), 12);
        assert!(matches!(ctx.subject("GHOST"), Err(EngineError::UnknownSubject(_))));
    }

    #[test]
    fn test_empty_geometry_is_rejected() {
        let reference = campus();
        assert_eq!(
            SchedulingContext::new(&reference, &[], SLOTS).err(),
            Some(EngineError::NoWorkingDays)
        );
        assert_eq!(
            SchedulingContext::new(&reference, &WORKING_DAYS, 0).err(),
            Some(EngineError::NoTimeSlots)
        );
    }

    #[test]
    fn test_allocation_overrides_qualification() {
        let mut reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let qualified: Vec<&str> = ctx
            .faculty_candidates("B1", "T1")
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(qualified, vec!["F1", "F3"]);

        reference.faculty_allocations.push(FacultyAllocation {
            id: "A1".into(),
            batch_id: "B1".into(),
            subject_id: "T1".into(),
            faculty_ids: vec!["F4".into()],
        });
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let allocated: Vec<&str> = ctx
            .faculty_candidates("B1", "T1")
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(allocated, vec!["F4"]);
    }

    #[test]
    fn test_pinned_expansion() {
        let reference = pinned_campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        assert!(ctx.is_pinned(0, 0, "B1"));
        assert!(ctx.is_pinned(0, 1, "B1"));
        assert!(!ctx.is_pinned(0, 2, "B1"));
        assert!(!ctx.is_pinned(0, 0, "B2"));
        let pins = ctx.pinned_assignments();
        assert_eq!(pins.len(), 2);
        assert_eq!(pins[0].id, "pin_seminar_0_0");
    }

    #[test]
    fn test_occupancy_tracks_duplicates() {
        let a = assignment("a", "B1", "T1", &["F1"], "R1", 0, 0);
        let b = assignment("b", "B2", "T1", &["F1"], "R2", 0, 0);
        let mut occupancy = Occupancy::default();
        occupancy.occupy(&a);
        occupancy.occupy(&b);
        occupancy.release(&a);
        assert!(!occupancy.faculty_free("F1", 0, 0));
        assert!(occupancy.batch_free("B1", 0, 0));
        assert!(occupancy.clashes(&b));
        occupancy.release(&b);
        assert!(!occupancy.clashes(&b));
    }

    #[test]
    fn test_availability_window() {
        let mut reference = campus();
        reference
            .constraints
            .faculty_availability
            .push(crate::data::FacultyAvailability {
                faculty_id: "F1".into(),
                availability: [(1, vec![2, 3])].into_iter().collect(),
            });
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        assert!(ctx.within_availability("F1", 0, 0));
        assert!(ctx.within_availability("F1", 1, 2));
        assert!(!ctx.within_availability("F1", 1, 0));
    }

    #[test]
    fn test_try_place_respects_room_type_and_faculty_count() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut grid = TimetableGrid::default();
        let mut occupancy = Occupancy::default();
        let class = RequiredClass {
            batch_id: "B1".into(),
            subject_id: "P1".into(),
        };

        let mut placed = None;
        for _ in 0..20 {
            placed = ctx.try_place(&class, &mut grid, &mut occupancy, &mut rng).unwrap();
            if placed.is_some() {
                break;
            }
        }
        let placed = placed.expect("an empty week always has room for one lab");
        assert_eq!(placed.room_id, "L1");
        assert_eq!(placed.faculty_ids.len(), 2);
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn test_try_place_unknown_batch_fails_loudly() {
        let reference = campus();
        let ctx = SchedulingContext::new(&reference, &WORKING_DAYS, SLOTS).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let class = RequiredClass {
            batch_id: "NOPE".into(),
            subject_id: "T1".into(),
        };
        let result = ctx.try_place(
            &class,
            &mut TimetableGrid::default(),
            &mut Occupancy::default(),
            &mut rng,
        );
        assert_eq!(result, Err(EngineError::UnknownBatch("NOPE".into())));
    }
}
