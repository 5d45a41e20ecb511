//! Run lifecycle events.
//!
//! The driver and the stage runner report progress through an [`EventSink`].
//! Event types:
//!
//! | type              | payload                                          |
//! |-------------------|--------------------------------------------------|
//! | `run.started`     | `run_id`, `pipeline`, `items`, `parallelism`     |
//! | `stage.started`   | `stage`, `enabled`                               |
//! | `stage.classified`| `stage`, `reuse`, `recompute`, `failed`          |
//! | `item.failed`     | `stage`, `item`, `kind`, `error`                 |
//! | `stage.completed` | `stage`, `status`, counts, `duration_ms`         |
//! | `run.completed`   | `run_id`, `duration_ms`, `failures`              |
//! | `run.halted`      | `run_id`, `stage`, `status`, `message`           |

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
