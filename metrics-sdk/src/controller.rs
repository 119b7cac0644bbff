//! Periodic collection and export.
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use quanta::Clock;
use tracing::{debug, error};

use crate::{
    accumulator::{Accumulator, AccumulatorBuilder},
    processor::{BasicProcessor, CheckpointSet},
    selector::AggregatorSelector,
    ErrorHandler, LoggingErrorHandler, MetricsError,
};

const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends checkpointed metrics somewhere.
pub trait Exporter: Send + Sync {
    /// Exports a checkpoint.
    fn export(&self, checkpoint: &CheckpointSet) -> Result<(), MetricsError>;
}

/// Builder for a [`PushController`].
pub struct PushControllerBuilder {
    exporter: Arc<dyn Exporter>,
    selector: Option<Arc<dyn AggregatorSelector>>,
    error_handler: Arc<dyn ErrorHandler>,
    clock: Clock,
    interval: Duration,
    timeout: Duration,
    stateful: bool,
}

impl PushControllerBuilder {
    /// Creates a new `PushControllerBuilder` that exports to `exporter`.
    pub fn new(exporter: Arc<dyn Exporter>) -> Self {
        PushControllerBuilder {
            exporter,
            selector: None,
            error_handler: Arc::new(LoggingErrorHandler),
            clock: Clock::new(),
            interval: DEFAULT_PUSH_INTERVAL,
            timeout: DEFAULT_COLLECT_TIMEOUT,
            stateful: false,
        }
    }

    /// Sets the aggregator selector.
    ///
    /// Defaults to a `SimpleSelector` with default histogram boundaries.
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn AggregatorSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Sets the error handler.
    ///
    /// Defaults to [`LoggingErrorHandler`].
    #[must_use]
    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Sets the clock used for timestamps and collection deadlines.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Sets how often metrics are collected and exported.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_push_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets how long a single collection pass may run before it is stopped.
    ///
    /// Records not visited in time are collected by the next pass.  Defaults to 5 seconds.
    #[must_use]
    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether exported values are cumulative or deltas.
    ///
    /// When stateful, every export carries the totals since each metric was first recorded.  When
    /// stateless, every export carries only the changes since the previous export.  Defaults to
    /// stateless.
    #[must_use]
    pub fn with_stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    /// Builds the controller.
    ///
    /// The controller does not collect in the background until [`PushController::start`] is
    /// called.
    pub fn build(self) -> PushController {
        let processor = Arc::new(BasicProcessor::new(self.stateful));
        let mut builder = AccumulatorBuilder::new(processor.clone())
            .with_error_handler(Arc::clone(&self.error_handler))
            .with_clock(self.clock);
        if let Some(selector) = self.selector {
            builder = builder.with_selector(selector);
        }

        PushController {
            shared: Arc::new(Shared {
                accumulator: builder.build(),
                processor,
                exporter: self.exporter,
                error_handler: self.error_handler,
                timeout: self.timeout,
                tick: Mutex::new(()),
            }),
            interval: self.interval,
            worker: Mutex::new(None),
        }
    }
}

struct Shared {
    accumulator: Accumulator,
    processor: Arc<BasicProcessor>,
    exporter: Arc<dyn Exporter>,
    error_handler: Arc<dyn ErrorHandler>,
    timeout: Duration,
    tick: Mutex<()>,
}

impl Shared {
    fn tick(&self) {
        let _guard = self.tick.lock();
        let _ = self.accumulator.collect_with_timeout(self.timeout);
        let checkpoint = self.processor.checkpoint();
        debug!(metrics = checkpoint.len(), "Exporting checkpoint.");
        if let Err(e) = self.exporter.export(&checkpoint) {
            self.error_handler.handle(e);
        }
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Collects and exports metrics on a fixed interval from a background thread.
pub struct PushController {
    shared: Arc<Shared>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl PushController {
    /// Gets the accumulator instruments should be created from.
    pub fn accumulator(&self) -> &Accumulator {
        &self.shared.accumulator
    }

    /// Starts the background thread.
    ///
    /// Calling `start` on a running controller does nothing.
    ///
    /// # Errors
    ///
    /// If the background thread cannot be spawned, an error is returned.
    pub fn start(&self) -> Result<(), MetricsError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let (stop, stopped) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name("metrics-sdk-push".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => shared.tick(),
                    _ => break,
                }
            })
            .map_err(|_| MetricsError::Backend)?;

        debug!(interval_ms = interval.as_millis() as u64, "Push controller started.");
        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stops the background thread, then collects and exports one final time.
    ///
    /// Calling `stop` on a controller that is not running does nothing.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        let _ = worker.stop.send(());
        if worker.handle.join().is_err() {
            error!("Push controller thread panicked.");
        }

        self.shared.tick();
        debug!("Push controller stopped.");
    }

    /// Collects and exports immediately, on the calling thread.
    pub fn collect_now(&self) {
        self.shared.tick();
    }

    /// Whether or not the background thread is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Drop for PushController {
    fn drop(&mut self) {
        self.stop();
    }
}
