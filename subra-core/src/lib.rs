mod config;
mod dao;
mod metrics;
mod runtime;
mod soup;
mod utils;

pub use config::Properties;
pub use dao::{InstanceStore, MemoryInstanceStore};
pub use runtime::{
    AckType, ChannelListener, CorrelationEntry, ExchangeState, ExchangeStatus, Failure,
    FailureType, HandlerRegistry, JobDetails, JobType, MemoryScheduler, Message,
    MessageExchangeContext, OutstandingRequestManager, PartnerLinkInstance,
    PartnerRoleMessageExchange, ScheduledJob, Scheduler, Selector, Vpu, VpuContext,
    VpuStatistics, RUN_METHOD,
};
pub use soup::{
    ChannelId, ClosureId, ClosureRecord, Comm, CommGroup, Continuation, ExecutionQueue,
    KeyedReplacementMap, ReplacementMap, SharedValueResolver,
};
pub use utils::IdGenerator;
