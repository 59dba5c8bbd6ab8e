//! Genetic timetable search for university batches, faculty and rooms, with a
//! feasibility checker, pre-flight diagnostics and an HTTP front end.

pub mod checker;
pub mod config;
pub mod context;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod fitness;
pub mod http_oracle;
pub mod operators;
pub mod oracle;
pub mod population;
pub mod server;
pub mod slots;
pub mod solver;
