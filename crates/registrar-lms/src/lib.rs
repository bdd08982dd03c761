//! Reading and writing enrollment and grade data in the LMS.

mod client;
mod format;
mod grades;
mod interop;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod paginate;
mod sync;

pub use client::HttpLmsClient;
pub use format::{
    course_enrollments_to_csv, enrollment_results_to_csv, program_enrollments_to_csv,
    serialize_to_csv, to_pretty_json,
};
pub use grades::course_grades_to_csv;
pub use interop::{LmsEndpoints, LmsInterop};
pub use paginate::{get_all_paginated_responses, get_all_paginated_results, LmsPage};
pub use registrar_types::{LmsError, LmsMethod, LmsResponse, LmsTransport};
pub use sync::EnrollmentSynchronizer;

#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockLmsTransport, RecordedCall};
