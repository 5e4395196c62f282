pub mod correction;
pub mod language;
pub mod problem;
pub mod submission;

pub use correction::{
    CompileLimits, CompileOutcome, CorrectionReport, CorrectionRequest, CorrectionResult,
    ExecutionMeta, TestInput, TestOutcome, TestVerdict, Verdict,
};
pub use language::Language;
pub use problem::{ExecutionLimits, Fixture, Problem, PropValue, Properties, TestCase, TestType};
pub use submission::{
    AttemptStatus, AttemptView, ScoreState, Submission, SubmissionCode, SubmitCodeRequest,
    SubmitCodeResponse,
};
