pub mod reporting;

pub use reporting::{CancellationToken, NullReporter, OperationKind, Reporter};
