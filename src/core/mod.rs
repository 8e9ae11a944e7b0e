pub mod gate;
pub mod ledger;
pub mod references;
pub mod workflow;

pub use crate::domain::model::{Order, OrderLine, OrderNotification, TimeWindow};
pub use crate::domain::ports::{Notifier, OrderSource, ReferenceFetcher, Storage};
pub use crate::utils::error::Result;
pub use gate::OperatingHours;
pub use ledger::NotificationLedger;
pub use references::{ReferenceOptions, ReferenceSet};
pub use workflow::{RunOutcome, RunReport, RunState, Workflow, WorkflowConfig};
