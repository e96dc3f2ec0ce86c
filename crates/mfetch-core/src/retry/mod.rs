//! Failure classification and retry policy for the fetch stage.
//!
//! Extractor failures are classified from the tool's output so that only
//! transient network trouble is retried; not-found, geo-blocked, size and
//! tool errors surface immediately.

mod classify;
mod policy;
mod run;

pub use classify::{classify_extractor_output, FailureClass};
pub use policy::{RetryDecision, RetryPolicy};
pub use run::{run_with_retry, Retryable};
