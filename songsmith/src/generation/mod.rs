//! Generation job orchestration.
//!
//! - [`error`]: severity taxonomy and the classifier
//! - [`request`]: inbound requests and the submission gate
//! - [`pipeline`]: per-unit step sequence with progress reporting
//! - [`runner`]: external queue hand-off or tracked background tasks
//! - [`recovery`]: startup sweep of jobs orphaned by a restart
//! - [`service`]: the facade the HTTP layer talks to

pub mod error;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod recovery;
pub mod request;
pub mod runner;
pub mod service;

pub use error::{ErrorKind, GenerationError, Severity, classify};
pub use pipeline::{ABORTED_MESSAGE, Collaborators, GenerationPipeline, PipelineOutcome, Step};
pub use recovery::{INTERRUPTED_MESSAGE, IntegrityReport, RecoverySweep, SweepReport};
pub use request::{GenerationRequest, ItemSpec, WorkUnit};
pub use runner::{Dispatch, JobRunner, ShutdownReport, TaskRegistry};
pub use service::{GenerationService, StartupReport, Submission};
