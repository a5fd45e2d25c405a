use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use subra_common::prelude::*;

use super::partner_mex::PartnerRoleMessageExchange;
use crate::metrics::Monitors;
use crate::utils::IdGenerator;

/// Kind of work a scheduled job carries back into an instance when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
pub enum JobType {
    /// A timer (wait, pick alarm, invocation timeout) came due.
    Timer,
    /// A partner invocation response is ready for pickup.
    InvokeResponse,
    /// A matcher gave up waiting for a correlated message.
    MatcherTimeout,
}

/// Payload of a scheduled job. `channel` is an exported channel id; when the
/// job fires, the engine turns it into a send on that channel, which is how
/// timeouts and asynchronous responses re-enter the soup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub instance_id: InlineStr,
    pub job_type: JobType,
    pub channel: Option<InlineStr>,
    pub mex_id: Option<InlineStr>,
}

/// Scheduling collaborator. This core schedules nothing on its own; the
/// scheduler decides when jobs fire and on which worker thread.
pub trait Scheduler: Send + Sync {
    /// Schedules a job that survives engine restarts.
    fn schedule_persisted_job(
        &self,
        details: JobDetails,
        when: Option<DateTime<Utc>>,
    ) -> SubResult<InlineStr>;

    /// Schedules a job that lives only as long as the VM; `transacted` ties
    /// its visibility to the caller's transaction.
    fn schedule_volatile_job(
        &self,
        transacted: bool,
        details: JobDetails,
        when: Option<DateTime<Utc>>,
    ) -> SubResult<InlineStr>;

    /// Cancelling an already-fired or unknown job is benign.
    fn cancel_job(&self, job_id: &str) -> SubResult<()>;
}

/// Transport-side collaborator: resolves the partner endpoint and performs
/// the invocation, eventually calling one of the `reply*` methods on the
/// exchange from whatever thread the reply arrives on.
pub trait MessageExchangeContext: Send + Sync {
    fn invoke_partner(&self, mex: &Arc<PartnerRoleMessageExchange>) -> SubResult<()>;
}

/// A job with its deadline, as handed out by `MemoryScheduler::drain_due`.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub job_id: InlineStr,
    pub details: JobDetails,
    pub when: Option<DateTime<Utc>>,
}

/// In-process scheduler for tests and embedded use. Jobs are parked until
/// their deadline and handed out by `drain_due`; both schedule flavors behave
/// the same here since there is nothing to persist across a restart.
pub struct MemoryScheduler {
    tx: Sender<ScheduledJob>,
    rx: Receiver<ScheduledJob>,
    parked: Mutex<Vec<ScheduledJob>>,
    cancelled: Mutex<HashSet<InlineStr>>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            parked: Mutex::new(Vec::new()),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    fn enqueue(
        &self,
        details: JobDetails,
        when: Option<DateTime<Utc>>,
        persisted: bool,
    ) -> SubResult<InlineStr> {
        let job_id = IdGenerator::generate();
        Monitors::record_job_scheduled(details.job_type.as_ref(), persisted);
        trace!(
            "scheduling {} job {} for instance {}",
            details.job_type.as_ref(),
            job_id,
            details.instance_id
        );
        self.tx
            .send(ScheduledJob {
                job_id: job_id.clone(),
                details,
                when,
            })
            .map_err(|_| ErrorCode::SchedulerFailed("job feed disconnected"))?;
        Ok(job_id)
    }

    /// Releases every job whose deadline is at or before `now`, skipping
    /// cancelled ones. Jobs not yet due stay parked.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let mut parked = self.parked.lock();
        parked.extend(self.rx.try_iter());

        let cancelled = self.cancelled.lock();
        let mut due = Vec::new();
        parked.retain(|job| {
            if cancelled.contains(&job.job_id) {
                return false;
            }
            if job.when.map(|when| when <= now).unwrap_or(true) {
                due.push(job.clone());
                false
            } else {
                true
            }
        });
        due
    }
}

impl Default for MemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for MemoryScheduler {
    fn schedule_persisted_job(
        &self,
        details: JobDetails,
        when: Option<DateTime<Utc>>,
    ) -> SubResult<InlineStr> {
        self.enqueue(details, when, true)
    }

    fn schedule_volatile_job(
        &self,
        _transacted: bool,
        details: JobDetails,
        when: Option<DateTime<Utc>>,
    ) -> SubResult<InlineStr> {
        self.enqueue(details, when, false)
    }

    fn cancel_job(&self, job_id: &str) -> SubResult<()> {
        self.cancelled.lock().insert(job_id.into());
        Ok(())
    }
}
