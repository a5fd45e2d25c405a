mod context;
mod correlation;
mod partner_mex;
mod vpu;

pub use context::{
    JobDetails, JobType, MemoryScheduler, MessageExchangeContext, ScheduledJob, Scheduler,
};
pub use correlation::{
    CorrelationEntry, OutstandingRequestManager, PartnerLinkInstance, Selector,
};
pub use partner_mex::{
    AckType, ExchangeState, ExchangeStatus, Failure, FailureType, Message,
    PartnerRoleMessageExchange,
};
pub use vpu::{ChannelListener, HandlerRegistry, Vpu, VpuContext, VpuStatistics, RUN_METHOD};
