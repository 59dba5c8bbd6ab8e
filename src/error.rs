use thiserror::Error;

/// Failures that indicate a broken input snapshot rather than a hard search problem.
///
/// An unplaceable class is never an error; it just lowers the fitness of the
/// individual it is missing from.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("batch {0} is referenced by the timetable but missing from the input")]
    UnknownBatch(String),
    #[error("subject {0} is referenced by the timetable but missing from the input")]
    UnknownSubject(String),
    #[error("timetable settings produce no time slots")]
    NoTimeSlots,
    #[error("no working days configured")]
    NoWorkingDays,
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}
