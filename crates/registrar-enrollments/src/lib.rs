//! Enrollment orchestration: synchronous writes plus read, grade and bulk write jobs, built on
//! the program directory, the program details cache, the LMS and the job manager.

mod context;
mod directory;
mod read;
mod service;
mod upload;
mod write;

pub use context::{enrollment_job_name, is_enrollment_job_processing, EnrollmentContext, JobAccess};
pub use directory::InMemoryProgramDirectory;
pub use read::{
    ListAllCourseRunEnrollments, ListCourseRunEnrollments, ListCourseRunGrades,
    ListProgramEnrollments,
};
pub use registrar_types::EnrollmentError;
pub use service::{EnrollmentProgram, EnrollmentService};
pub use upload::{load_records_from_csv, CsvRecord, UPLOAD_FILE_MAX_SIZE};
pub use write::{screen_statuses, UploadedEnrollment, WriteCourseRunEnrollments, WriteProgramEnrollments};
