//! Core types and traits shared by the registrar crates.
//!
//! Job records and their lifecycle states, enrollment records and write outcomes, grades,
//! and the traits at the seams to external systems (object store, LMS, catalog).

mod enrollment;
mod grade;
mod job;
mod traits;

pub use enrollment::*;
pub use grade::*;
pub use job::*;
pub use traits::*;
