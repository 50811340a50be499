//! Job Queue - In-Process Priority Queue Worker Library
//!
//! A reusable library for building typed background workers with:
//! - Per-queue priority dispatch (strict priority, FIFO within a level)
//! - Delayed delivery and automatic retry with exponential backoff
//! - Per-queue concurrency caps enforced by the broker
//! - Error categorization (transient vs permanent) driving retry behavior
//! - Lifecycle event fan-out over a bounded broadcast bus
//! - Short-TTL progress cache with redis and in-memory backings
//! - Graceful shutdown with a bounded grace window
//!
//! # Architecture
//!
//! ```text
//! Producer (queue façade)
//!   ↓ submit
//! Broker (per-queue priority heaps + delay + concurrency caps)
//!   ↓ dispatch
//! QueueWorker<J, P>
//!   ↓ wraps
//! JobProcessor<J>  — the domain worker body
//!   ↕ transitions
//! JobLifecycle     — the durable store adapter
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use job_queue::{Broker, JobProcessor, QueueJob, QueueWorker, WorkerConfig};
//!
//! // 1. Define your job envelope
//! #[derive(Clone, Serialize, Deserialize)]
//! struct MyJob { id: Uuid, queue: String, retry_count: u32, /* ... */ }
//!
//! impl QueueJob for MyJob { /* ... */ }
//!
//! // 2. Implement a processor for one job family
//! struct MyProcessor;
//!
//! #[async_trait]
//! impl JobProcessor<MyJob> for MyProcessor {
//!     async fn process(&self, job: &MyJob, progress: &ProgressReporter)
//!         -> Result<serde_json::Value, QueueError> { /* ... */ }
//!     fn name(&self) -> &'static str { "my_processor" }
//! }
//!
//! // 3. Run the worker against the shared broker
//! let worker = QueueWorker::new(broker, MyProcessor, lifecycle, progress, bus, config);
//! tokio::spawn(async move { worker.run(shutdown_rx).await });
//! ```

pub mod broker;
pub mod bus;
pub mod error;
pub mod metrics;
pub mod priority;
pub mod progress;
pub mod registry;
pub mod runtime;

pub use broker::{BackoffPolicy, Broker, QueueStats};
pub use bus::{BusEvent, EventBus, EventKind, EVENT_BUS_CAPACITY};
pub use error::{ErrorCategory, QueueError};
pub use priority::QueuePriority;
pub use progress::{InMemoryProgressCache, JobProgress, ProgressStore, RedisProgressCache, PROGRESS_TTL};
pub use registry::{JobLifecycle, JobProcessor, ProgressReporter, QueueJob};
pub use runtime::{QueueWorker, WorkerConfig};
