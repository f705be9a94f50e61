mod processor;
mod store;

pub use processor::{ProcessorSettings, QueueEvent, QueueProcessor};
pub use store::{
    DrainStatus, EnqueueReceipt, ItemOutcome, ItemRecord, NextItem, SessionId, SessionPhase,
    SessionState, SessionStore,
};
