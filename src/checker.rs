//! Feasibility checker: every hard and soft rule violation, per assignment.
//!
//! The checker is a pure function of (grid, reference data). It is used on final
//! candidates and on user-edited grids, so it tolerates partially loaded data: a
//! rule whose lookup fails is skipped for that assignment instead of erroring.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::data::{
    AssignmentId, Batch, ClassAssignment, Day, Faculty, FacultyId, MAX_SLOTS_PER_DAY,
    PinnedAssignment, ReferenceData, Room, Slot, Subject, TimetableGrid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ConflictKind {
    #[serde(rename = "Faculty Double-Booking")]
    FacultyDoubleBooking,
    #[serde(rename = "Room Double-Booking")]
    RoomDoubleBooking,
    #[serde(rename = "Batch Double-Booking")]
    BatchDoubleBooking,
    #[serde(rename = "Faculty Unavailability")]
    FacultyUnavailability,
    #[serde(rename = "Pinned Assignment Clash")]
    PinnedAssignmentClash,
    #[serde(rename = "Room Capacity")]
    RoomCapacity,
    #[serde(rename = "Room Type Mismatch")]
    RoomTypeMismatch,
    #[serde(rename = "Room Allocation Mismatch")]
    RoomAllocationMismatch,
    #[serde(rename = "Faculty Allocation Mismatch")]
    FacultyAllocationMismatch,
}

impl ConflictKind {
    /// Resource-rule violations that must be absent from any accepted timetable.
    pub fn is_hard(self) -> bool {
        matches!(
            self,
            ConflictKind::FacultyDoubleBooking
                | ConflictKind::RoomDoubleBooking
                | ConflictKind::BatchDoubleBooking
                | ConflictKind::RoomCapacity
                | ConflictKind::RoomTypeMismatch
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub message: String,
}

impl Conflict {
    fn new(kind: ConflictKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

pub type ConflictMap = BTreeMap<AssignmentId, Vec<Conflict>>;

/// Number of hard conflicts across the whole map.
pub fn count_hard_conflicts(conflicts: &ConflictMap) -> usize {
    conflicts
        .values()
        .flatten()
        .filter(|c| c.kind.is_hard())
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PinnedResource<'a> {
    Faculty(&'a str),
    Room(&'a str),
    Batch(&'a str),
}

pub struct ConflictChecker<'a> {
    subjects: HashMap<&'a str, &'a Subject>,
    faculty: HashMap<&'a str, &'a Faculty>,
    rooms: HashMap<&'a str, &'a Room>,
    batches: HashMap<&'a str, &'a Batch>,
    allocations: HashMap<(&'a str, &'a str), &'a [FacultyId]>,
    availability: HashMap<&'a str, &'a BTreeMap<Day, Vec<Slot>>>,
    pins: HashMap<(Day, Slot, PinnedResource<'a>), &'a PinnedAssignment>,
}

impl<'a> ConflictChecker<'a> {
    pub fn new(reference: &'a ReferenceData) -> Self {
        let mut pins = HashMap::new();
        for pin in &reference.constraints.pinned_assignments {
            for (day, slot) in pin.cells(MAX_SLOTS_PER_DAY) {
                pins.insert((day, slot, PinnedResource::Faculty(&pin.faculty_id)), pin);
                pins.insert((day, slot, PinnedResource::Room(&pin.room_id)), pin);
                pins.insert((day, slot, PinnedResource::Batch(&pin.batch_id)), pin);
            }
        }

        Self {
            subjects: reference.subjects.iter().map(|s| (s.id.as_str(), s)).collect(),
            faculty: reference.faculty.iter().map(|f| (f.id.as_str(), f)).collect(),
            rooms: reference.rooms.iter().map(|r| (r.id.as_str(), r)).collect(),
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
            pins,
        }
    }

    /// Conflicts per assignment id. Assignments without conflicts are absent.
    pub fn check(&self, grid: &TimetableGrid) -> ConflictMap {
        let assignments: Vec<&ClassAssignment> = grid.assignments().collect();
        let mut by_slot: HashMap<(Day, Slot), Vec<usize>> = HashMap::new();
        for (idx, a) in assignments.iter().enumerate() {
            by_slot.entry((a.day, a.slot)).or_default().push(idx);
        }

        let mut conflict_map = ConflictMap::new();
        for (idx, assignment) in assignments.iter().enumerate() {
            let others: Vec<&ClassAssignment> = by_slot[&(assignment.day, assignment.slot)]
                .iter()
                .filter(|&&other| other != idx)
                .map(|&other| assignments[other])
                .collect();

            let mut conflicts = self.double_bookings(assignment, &others);
            conflicts.extend(self.resource_suitability(assignment));
            conflicts.extend(self.constraint_violations(assignment));

            if !conflicts.is_empty() {
                conflict_map
                    .entry(assignment.id.clone())
                    .or_default()
                    .extend(conflicts);
            }
        }
        conflict_map
    }

    fn faculty_name(&self, id: &str) -> &str {
        self.faculty.get(id).map_or("Unknown Faculty", |f| f.name.as_str())
    }

    fn batch_name(&self, id: &str) -> Option<&str> {
        self.batches.get(id).map(|b| b.name.as_str())
    }

    fn double_bookings(&self, assignment: &ClassAssignment, others: &[&ClassAssignment]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for faculty_id in &assignment.faculty_ids {
            if let Some(clash) = others.iter().find(|o| o.faculty_ids.contains(faculty_id)) {
                conflicts.push(Conflict::new(
                    ConflictKind::FacultyDoubleBooking,
                    format!(
                        "{} is double-booked with {}.",
                        self.faculty_name(faculty_id),
                        self.batch_name(&clash.batch_id).unwrap_or("another batch")
                    ),
                ));
            }
        }

        if others.iter().any(|o| o.room_id == assignment.room_id) {
            let room = self.rooms.get(assignment.room_id.as_str()).map_or("This room", |r| r.name.as_str());
            conflicts.push(Conflict::new(
                ConflictKind::RoomDoubleBooking,
                format!("{room} is double-booked."),
            ));
        }

        if others.iter().any(|o| o.batch_id == assignment.batch_id) {
            let batch = self.batch_name(&assignment.batch_id).unwrap_or("This batch");
            conflicts.push(Conflict::new(
                ConflictKind::BatchDoubleBooking,
                format!("{batch} has multiple classes scheduled."),
            ));
        }

        conflicts
    }

    fn resource_suitability(&self, assignment: &ClassAssignment) -> Vec<Conflict> {
        let (Some(batch), Some(room), Some(subject)) = (
            self.batches.get(assignment.batch_id.as_str()),
            self.rooms.get(assignment.room_id.as_str()),
            self.subjects.get(assignment.subject_id.as_str()),
        ) else {
            return Vec::new();
        };
        let mut conflicts = Vec::new();

        if room.capacity < batch.student_count {
            conflicts.push(Conflict::new(
                ConflictKind::RoomCapacity,
                format!(
                    "Room {} capacity ({}) is less than batch size ({}).",
                    room.name, room.capacity, batch.student_count
                ),
            ));
        }

        if room.kind != subject.kind.suitable_room() {
            conflicts.push(Conflict::new(
                ConflictKind::RoomTypeMismatch,
                format!(
                    "Room {} ({}) is not suitable for a {} class.",
                    room.name, room.kind, subject.kind
                ),
            ));
        }

        if !batch.allows_room(&room.id) {
            conflicts.push(Conflict::new(
                ConflictKind::RoomAllocationMismatch,
                format!(
                    "Room {} is not in the list of allocated rooms for batch {}.",
                    room.name, batch.name
                ),
            ));
        }

        if let Some(allocated) = self
            .allocations
            .get(&(batch.id.as_str(), subject.id.as_str()))
            .filter(|ids| !ids.is_empty())
        {
            for faculty_id in &assignment.faculty_ids {
                if !allocated.contains(faculty_id) {
                    conflicts.push(Conflict::new(
                        ConflictKind::FacultyAllocationMismatch,
                        format!(
                            "{} is not allocated to teach {} for {}.",
                            self.faculty.get(faculty_id.as_str()).map_or("A faculty member", |f| f.name.as_str()),
                            subject.code,
                            batch.name
                        ),
                    ));
                }
            }
        }

        conflicts
    }

    fn constraint_violations(&self, assignment: &ClassAssignment) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        let (day, slot) = (assignment.day, assignment.slot);

        for faculty_id in &assignment.faculty_ids {
            let unavailable = self
                .availability
                .get(faculty_id.as_str())
                .and_then(|days| days.get(&day))
                .is_some_and(|slots| !slots.contains(&slot));
            if unavailable {
                conflicts.push(Conflict::new(
                    ConflictKind::FacultyUnavailability,
                    format!(
                        "{} is marked as unavailable at this time.",
                        self.faculty.get(faculty_id.as_str()).map_or("A faculty member", |f| f.name.as_str())
                    ),
                ));
            }
        }

        // A pin only excludes occupants other than its own designated class.
        for faculty_id in &assignment.faculty_ids {
            if let Some(pin) = self.pins.get(&(day, slot, PinnedResource::Faculty(faculty_id))) {
                if pin.batch_id != assignment.batch_id || pin.subject_id != assignment.subject_id {
                    conflicts.push(Conflict::new(
                        ConflictKind::PinnedAssignmentClash,
                        format!(
                            "Clashes with pinned event: '{}' for faculty {}.",
                            pin.name,
                            self.faculty_name(faculty_id)
                        ),
                    ));
                }
            }
        }

        if let Some(pin) = self.pins.get(&(day, slot, PinnedResource::Room(&assignment.room_id))) {
            if pin.batch_id != assignment.batch_id || pin.subject_id != assignment.subject_id {
                conflicts.push(Conflict::new(
                    ConflictKind::PinnedAssignmentClash,
                    format!(
                        "Clashes with pinned event: '{}' for room {}.",
                        pin.name,
                        self.rooms.get(assignment.room_id.as_str()).map_or("", |r| r.name.as_str())
                    ),
                ));
            }
        }

        if let Some(pin) = self.pins.get(&(day, slot, PinnedResource::Batch(&assignment.batch_id))) {
            if pin.subject_id != assignment.subject_id {
                conflicts.push(Conflict::new(
                    ConflictKind::PinnedAssignmentClash,
                    format!(
                        "Clashes with pinned event: '{}' for batch {}.",
                        pin.name,
                        self.batch_name(&assignment.batch_id).unwrap_or("")
                    ),
                ));
            }
        }

        conflicts
    }
}
