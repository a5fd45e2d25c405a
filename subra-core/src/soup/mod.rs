mod comm;
mod execution_queue;
mod replacement;
mod snapshot;

pub use comm::{ChannelId, ClosureId, ClosureRecord, Comm, CommGroup, Continuation};
pub use execution_queue::ExecutionQueue;
pub use replacement::{KeyedReplacementMap, ReplacementMap, SharedValueResolver};
