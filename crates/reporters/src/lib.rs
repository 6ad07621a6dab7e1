//! specrun reporters
//!
//! Consumers of the engine's run event stream and final report:
//! - [`ConsoleReporter`] logs one line per finished spec plus a run summary
//! - [`JsonReporter`] serializes the final report to a file
//!
//! Reporters implement [`Reporter`] and are driven from a single event
//! subscription by [`drive`]:
//!
//! ```no_run
//! # async fn example() {
//! use specrun_engine::{Runner, Suite};
//! use specrun_reporters::{drive, ConsoleReporter, Reporter};
//!
//! let tree = Suite::describe("suite", |cx| {
//!     cx.spec("works", |_| async { Ok(()) });
//! })
//! .build()
//! .unwrap();
//!
//! let mut runner = Runner::default();
//! let events = runner.subscribe();
//! let reporters: Vec<Box<dyn Reporter>> = vec![Box::new(ConsoleReporter)];
//! let (report, _) = tokio::join!(runner.run(tree), drive(events, &reporters));
//! assert!(report.success());
//! # }
//! ```

pub mod console;
pub mod json;

pub use console::{init_logging, ConsoleReporter, Reporter};
pub use json::JsonReporter;

use specrun_engine::{EventReceiver, RunEvent};

/// Fan run events out to every reporter until the run completes
pub async fn drive(mut events: EventReceiver, reporters: &[Box<dyn Reporter>]) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::SpecFinished(result) => {
                for reporter in reporters {
                    reporter.on_spec_finished(&result).await;
                }
            }
            RunEvent::RunFinished(report) => {
                for reporter in reporters {
                    reporter.on_run_finished(&report).await;
                }
                break;
            }
        }
    }
}
