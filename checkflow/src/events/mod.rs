//! Lifecycle events emitted by the executor and the pipeline.
//!
//! Sinks are injected into [`crate::pipeline::Pipeline`] and
//! [`crate::pipeline::StageExecutor`]; there is no process-global sink.
//!
//! Event types:
//!
//! | type                    | emitted when                                   |
//! |-------------------------|------------------------------------------------|
//! | `pipeline.started`      | a run invocation begins                        |
//! | `pipeline.completed`    | a run invocation ends                          |
//! | `pipeline.cancelled`    | cancellation stopped new stages from starting  |
//! | `stage.skipped`         | a stage already has a successful checkpoint    |
//! | `stage.started`         | an attempt begins                              |
//! | `stage.retrying`        | a failed idempotent attempt will be retried    |
//! | `stage.completed`       | an attempt succeeded                           |
//! | `stage.partial`         | an attempt produced partial output             |
//! | `stage.failed`          | the final attempt failed                       |
//! | `stage.upstream_failed` | a stage was failed without running             |

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
