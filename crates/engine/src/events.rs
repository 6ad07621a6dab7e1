//! Run event stream for streaming reporters
//!
//! Subscribers receive one `SpecFinished` per finalized spec, in completion
//! order, followed by a single `RunFinished` carrying the whole report.
//! Declaration order is a property of the report, not of the stream.

use tokio::sync::mpsc;

use crate::report::{Report, SpecResult};

/// Events fired while a run progresses
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A spec's result was finalized
    SpecFinished(SpecResult),
    /// The run completed; carries the final report
    RunFinished(Report),
}

/// Receiving side of a run event subscription
pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

pub(crate) type EventSender = mpsc::UnboundedSender<RunEvent>;

pub(crate) fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
