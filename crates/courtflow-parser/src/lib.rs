pub mod batch;
pub mod errors;
pub mod intake;
pub mod model;
pub mod row;
pub mod schema;

pub use batch::{validate_rows, BatchValidation, EarlyAbort, EarlyFailurePolicy, RowOutcome};
pub use errors::ParserError;
pub use intake::{
    read_rows, validate_file, FileValidationReport, IntakeLimits, IssueKind, StructuralIssue,
    Upload,
};
pub use model::{CaseReturnRow, OriginalCase, PartyCounts, RawCaseRow};
pub use row::{FieldError, FieldErrorKind, RowValidation, RowValidator};
