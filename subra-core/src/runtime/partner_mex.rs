use parking_lot::MutexGuard;
use serde_json::Value;
use strum_macros::AsRefStr;
use subra_common::prelude::*;

use crate::config::Properties;
use crate::metrics::Monitors;

/// Response payload of a partner invocation. Opaque to this core; the
/// transport layer decides what goes in it.
pub type Message = Value;

/// Lifecycle of one outbound partner invocation as seen from the engine side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum ExchangeState {
    /// The engine thread is synchronously inside the transport invocation
    /// call; a reply may come back on that same call stack.
    InvokeInProgress,
    /// The engine suspended all activity on the instance (checkpoint in
    /// progress); replies block until released.
    Held,
    /// The invocation escaped into the wild: a reply may arrive on any thread
    /// at any later time.
    Async,
    /// The engine discarded the exchange. Terminal; any further reply is a
    /// usage error by the integration layer.
    Dead,
}

/// Externally visible progress of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum ExchangeStatus {
    /// The request went out; a reply is still owed.
    Request,
    /// A reply (or failure) was recorded; the exchange is settled.
    Acked,
}

/// What kind of outcome settled the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum AckType {
    Response,
    Fault,
    Failure,
    OneWay,
}

/// Transport-level failure categories reported by the integration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum FailureType {
    InvalidEndpoint,
    UnknownEndpoint,
    CommunicationError,
    NoResponse,
    Aborted,
    Other,
}

/// Failure details attached to an exchange that could not complete.
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureType,
    pub description: InlineStr,
    pub details: Option<Value>,
}

type ResumeHook = Box<dyn FnOnce() + Send>;

struct Inner {
    state: ExchangeState,
    status: ExchangeStatus,
    ack: Option<AckType>,
    response: Option<Message>,
    fault: Option<InlineStr>,
    failure: Option<Failure>,
    resume: Option<ResumeHook>,
}

/// One outbound (partner role) message exchange: the rendezvous between the
/// engine thread that issued the invocation and whatever thread eventually
/// delivers the reply.
///
/// Unlike the soup, this object is genuinely multi-threaded: the owning
/// engine thread and any number of I/O callback threads race on it, so every
/// transition goes through one lock with two conditions (`state_changed`,
/// `acked`).
pub struct PartnerRoleMessageExchange {
    mex_id: InlineStr,
    op_name: InlineStr,
    inner: Mutex<Inner>,
    state_changed: Condvar,
    acked: Condvar,
}

impl PartnerRoleMessageExchange {
    pub fn new(mex_id: impl Into<InlineStr>, op_name: impl Into<InlineStr>) -> Self {
        Self {
            mex_id: mex_id.into(),
            op_name: op_name.into(),
            inner: Mutex::new(Inner {
                state: ExchangeState::InvokeInProgress,
                status: ExchangeStatus::Request,
                ack: None,
                response: None,
                fault: None,
                failure: None,
                resume: None,
            }),
            state_changed: Condvar::new(),
            acked: Condvar::new(),
        }
    }

    pub fn mex_id(&self) -> &str {
        &self.mex_id
    }

    pub fn op_name(&self) -> &str {
        &self.op_name
    }

    pub fn state(&self) -> ExchangeState {
        self.inner.lock().state
    }

    pub fn status(&self) -> ExchangeStatus {
        self.inner.lock().status
    }

    pub fn ack_type(&self) -> Option<AckType> {
        self.inner.lock().ack
    }

    pub fn response(&self) -> Option<Message> {
        self.inner.lock().response.clone()
    }

    pub fn fault(&self) -> Option<InlineStr> {
        self.inner.lock().fault.clone()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.inner.lock().failure.clone()
    }

    /// Installs the callback that wakes the suspended instance when a reply
    /// lands while the exchange is `Async` (typically a send on the
    /// instance's response channel, via the scheduler).
    pub fn set_resume_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.lock().resume = Some(Box::new(hook));
    }

    /// Engine-side state transition; wakes every reply blocked on `Held`.
    pub fn set_state(&self, new_state: ExchangeState) {
        let mut inner = self.inner.lock();
        trace!(
            "mex {}: state {} -> {}",
            self.mex_id,
            inner.state.as_ref(),
            new_state.as_ref()
        );
        inner.state = new_state;
        self.state_changed.notify_all();
    }

    pub fn reply(&self, response: Message) -> SubResult<()> {
        debug!("reply mex={}", self.mex_id);
        self.finish(AckType::Response, Some(response), None, None, true)
    }

    pub fn reply_with_fault(
        &self,
        fault_name: impl Into<InlineStr>,
        message: Message,
    ) -> SubResult<()> {
        debug!("reply_with_fault mex={}", self.mex_id);
        self.finish(AckType::Fault, Some(message), Some(fault_name.into()), None, true)
    }

    pub fn reply_with_failure(
        &self,
        kind: FailureType,
        description: impl Into<InlineStr>,
        details: Option<Value>,
    ) -> SubResult<()> {
        debug!("reply_with_failure mex={}", self.mex_id);
        self.finish(
            AckType::Failure,
            None,
            None,
            Some(Failure {
                kind,
                description: description.into(),
                details,
            }),
            true,
        )
    }

    /// Acknowledges a one-way invocation. There is no payload to route back
    /// and nothing to resume.
    pub fn reply_one_way_ok(&self) -> SubResult<()> {
        debug!("reply_one_way_ok mex={}", self.mex_id);
        self.finish(AckType::OneWay, None, None, None, false)
    }

    /// Blocks until the exchange is acknowledged or the timeout elapses.
    /// Returns immediately when already acknowledged.
    pub fn wait_for_ack(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.status != ExchangeStatus::Acked {
            if self.acked.wait_until(&mut inner, deadline).timed_out() {
                return inner.status == ExchangeStatus::Acked;
            }
        }
        true
    }

    /// `wait_for_ack` with the configured default deadline.
    pub fn wait_for_ack_default(&self) -> bool {
        self.wait_for_ack(Duration::from_millis(Properties::get_default_ack_timeout_ms()))
    }

    fn finish(
        &self,
        ack: AckType,
        response: Option<Message>,
        fault: Option<InlineStr>,
        failure: Option<Failure>,
        resume_on_async: bool,
    ) -> SubResult<()> {
        let hook = {
            let mut inner = self.inner.lock();
            self.check_reply_context(&mut inner)?;
            inner.response = response;
            inner.fault = fault;
            inner.failure = failure;
            inner.ack = Some(ack);
            inner.status = ExchangeStatus::Acked;
            Monitors::record_exchange_ack(self.mex_id.as_str(), ack.as_ref());
            self.acked.notify_all();
            if resume_on_async && inner.state == ExchangeState::Async {
                inner.resume.take()
            } else {
                None
            }
        };
        // the wake-up re-enters the engine (scheduler, soup); it must run
        // outside this exchange's lock
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    fn check_reply_context(&self, inner: &mut MutexGuard<'_, Inner>) -> SubResult<()> {
        while inner.state == ExchangeState::Held {
            self.state_changed.wait(inner);
        }
        if inner.state == ExchangeState::Dead {
            return fmt_err!(
                ExchangeDead,
                "message exchange {} already discarded by the engine",
                self.mex_id
            );
        }
        if inner.status != ExchangeStatus::Request {
            return fmt_err!(
                InvalidExchangeStatus,
                "message exchange {} expects status {}, got {}",
                self.mex_id,
                ExchangeStatus::Request.as_ref(),
                inner.status.as_ref()
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for PartnerRoleMessageExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        write!(
            f,
            "{{PartnerRoleMex#{} calling {}(...) state={} status={}}}",
            self.mex_id,
            self.op_name,
            inner.state.as_ref(),
            inner.status.as_ref()
        )
    }
}
