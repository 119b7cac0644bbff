use thiserror::Error;
use tracing::{error, warn};

/// Errors reported by the SDK.
///
/// None of these are fatal: they are delivered to an [`ErrorHandler`] and the operation that
/// raised them carries on without the offending measurement or record.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MetricsError {
    /// A NaN value was recorded.
    #[error("NaN value is an invalid input")]
    NaNInput,

    /// An infinite value was recorded.
    #[error("infinite value is an invalid input")]
    InfInput,

    /// A negative value was recorded on an instrument that only accepts non-negative values.
    #[error("negative value is out of range for this instrument")]
    NegativeInput,

    /// Two aggregators of different types were combined.
    #[error("inconsistent aggregator types: expected {expected}, found {found}")]
    InconsistentAggregator {
        /// Aggregator that was operated on.
        expected: &'static str,
        /// Aggregator that was passed as the argument.
        found: &'static str,
    },

    /// Two aggregators of the same type but with different configurations were combined, such as
    /// histograms with different bucket boundaries.
    #[error("{0} aggregators were configured differently")]
    InconsistentConfig(&'static str),

    /// The aggregation does not support subtraction.
    #[error("{0} aggregation does not support subtraction")]
    NoSubtraction(&'static str),

    /// The aggregation holds no data.
    #[error("no data collected by this aggregator")]
    NoData,

    /// A quantile outside of `[0.0, 1.0]` was requested.
    #[error("quantile {0} is out of range [0, 1]")]
    InvalidQuantile(f64),

    /// Collection ran out of time before visiting every record.
    #[error("collection deadline exceeded with {remaining} records left unvisited")]
    CollectionTimeout {
        /// Number of records that were not checkpointed this cycle.
        remaining: usize,
    },

    /// A processor rejected an accumulation.
    #[error("processor failed: {0}")]
    Processor(String),

    /// Failed to spawn the background collection thread.
    #[error("failed to spawn background thread for push controller")]
    Backend,

    /// An exporter failed to export a checkpoint.
    #[error("export failed: {0}")]
    Export(String),

    /// Several member aggregators of a multi aggregator failed.
    #[error("{} member aggregators failed", .0.len())]
    Multiple(Vec<MetricsError>),
}

impl MetricsError {
    /// Whether or not this error is the result of an invalid measurement.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, MetricsError::NaNInput | MetricsError::InfInput | MetricsError::NegativeInput)
    }
}

/// Receives errors that the SDK cannot return to a caller.
///
/// Measurement and collection paths never fail from the caller's point of view, so errors raised
/// along them are routed here instead.  Any `Fn(MetricsError)` closure is an `ErrorHandler`.
pub trait ErrorHandler: Send + Sync {
    /// Handles an error.
    fn handle(&self, error: MetricsError);
}

impl<F> ErrorHandler for F
where
    F: Fn(MetricsError) + Send + Sync,
{
    fn handle(&self, error: MetricsError) {
        self(error)
    }
}

/// An [`ErrorHandler`] that writes errors to the diagnostic log.
///
/// Invalid measurements are logged at the warning level and everything else at the error level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, err: MetricsError) {
        if err.is_invalid_input() {
            warn!(error = %err, "Dropped invalid measurement.");
        } else {
            error!(error = %err, "Metrics SDK error.");
        }
    }
}
