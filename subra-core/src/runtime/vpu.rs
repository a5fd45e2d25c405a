use serde_json::Value;
use subra_common::prelude::*;

use crate::config::Properties;
use crate::metrics::Monitors;
use crate::soup::{
    ChannelId, ClosureId, ClosureRecord, CommGroup, Continuation, ExecutionQueue,
};

/// Conventional entry method of a closure that is injected into the soup
/// rather than matched against a send.
pub const RUN_METHOD: &str = "run";

/// A compiled activity body. One implementation is registered per closure
/// kind; the VPU routes every dispatched reaction to the implementation
/// registered for the reaction's closure.
pub trait ChannelListener: Send + Sync {
    fn on_message(
        &self,
        cx: &mut VpuContext<'_>,
        state: &Value,
        method: &str,
        args: &[Value],
    ) -> SubResult<()>;
}

/// Closure-kind to handler table, built once at engine startup. Replaces
/// reflective method dispatch with an explicit lookup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<InlineStr, Arc<dyn ChannelListener>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same kind twice is a wiring bug.
    pub fn register(
        &mut self,
        kind: impl Into<InlineStr>,
        handler: Arc<dyn ChannelListener>,
    ) -> SubResult<()> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return fmt_err!(IllegalState, "handler for kind '{}' already registered", kind);
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    fn get(&self, kind: &str) -> Option<Arc<dyn ChannelListener>> {
        self.handlers.get(&InlineStr::from(kind)).cloned()
    }
}

/// Running totals for one instance's VPU.
#[derive(Debug, Default)]
pub struct VpuStatistics {
    pub num_cycles: u64,
    pub total_run_time: Duration,
    pub messages_sent: u64,
    pub channels_created: u64,
    pub reductions: u64,
}

/// Executes one process instance by dispatching scheduled reactions from its
/// soup to registered handlers, one cycle at a time. Single-threaded per
/// instance: the external scheduler decides when and where `execute` runs.
pub struct Vpu {
    queue: ExecutionQueue,
    registry: Arc<HandlerRegistry>,
    cycle: u32,
    fault: Option<String>,
    statistics: VpuStatistics,
}

impl Vpu {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::with_queue(ExecutionQueue::new(), registry)
    }

    /// Wraps an already-populated soup, e.g. one just restored from a
    /// snapshot (rehydration).
    pub fn with_queue(queue: ExecutionQueue, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            queue,
            registry,
            cycle: 0,
            fault: None,
            statistics: VpuStatistics::default(),
        }
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ExecutionQueue {
        &mut self.queue
    }

    pub fn statistics(&self) -> &VpuStatistics {
        &self.statistics
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.queue.is_complete()
    }

    /// Seeds execution with a fresh closure, scheduling its `run` method.
    /// This is how a process instance starts.
    pub fn inject(&mut self, closure: ClosureRecord) {
        debug!("injecting {}", closure.kind);
        let id = self.queue.register_closure(closure);
        self.queue
            .enqueue_reaction(Continuation::new(id, RUN_METHOD, Vec::new()));
        self.statistics.reductions += 1;
    }

    /// Executes one VPU cycle. Returns false when there was nothing to
    /// dispatch. A handler error is latched as the instance fault and
    /// re-surfaced on every subsequent call; a faulted instance makes no
    /// further progress until the enclosing transaction rolls it back.
    pub fn execute(&mut self) -> SubResult<bool> {
        if let Some(fault) = &self.fault {
            return fmt_err!(IllegalState, "instance faulted: {}", fault);
        }
        if !self.queue.has_reactions() {
            return Ok(false);
        }
        self.cycle = self.queue.cycle();
        let reaction = self.queue.dequeue_reaction()?;

        let started = Instant::now();
        if let Err(e) = self.dispatch(reaction) {
            self.fault = Some(e.message());
            Monitors::error("Vpu", "execute");
            return Err(e);
        }
        let elapsed = started.elapsed();

        self.statistics.num_cycles += 1;
        self.statistics.total_run_time += elapsed;
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms >= Properties::get_slow_reaction_threshold_ms() {
            warn!("cycle {} took {:?}", self.cycle, elapsed);
        }
        Monitors::record_reaction_dispatch_time(elapsed_ms as i64);
        Ok(true)
    }

    fn dispatch(&mut self, reaction: Continuation) -> SubResult<()> {
        let closure = self.queue.closure(reaction.closure)?.clone();
        let handler = self.registry.get(&closure.kind).ok_or_else(|| {
            ErrorCode::IllegalState(format!(
                "no handler registered for closure kind '{}'",
                closure.kind
            ))
        })?;

        if let Some(description) = &reaction.description {
            trace!(">> [{}] : {}", self.cycle, description);
        } else {
            trace!(
                ">> [{}] : {}.{}",
                self.cycle,
                closure.kind,
                reaction.method
            );
        }

        let mut cx = VpuContext {
            queue: &mut self.queue,
            statistics: &mut self.statistics,
        };
        handler.on_message(&mut cx, &closure.state, &reaction.method, &reaction.args)
    }

    /// Logs VPU totals and the soup summary for debugging.
    pub fn dump_state(&self) {
        info!(
            "vpu: cycles={} run_time={:?} messages_sent={} channels_created={} reductions={}",
            self.statistics.num_cycles,
            self.statistics.total_run_time,
            self.statistics.messages_sent,
            self.statistics.channels_created,
            self.statistics.reductions
        );
        self.queue.dump_state();
    }
}

/// Handed to a handler for the duration of one dispatch; every soup mutation
/// a running activity may perform goes through here.
pub struct VpuContext<'a> {
    queue: &'a mut ExecutionQueue,
    statistics: &'a mut VpuStatistics,
}

impl VpuContext<'_> {
    pub fn new_channel(
        &mut self,
        capability: impl Into<InlineStr>,
        description: Option<&str>,
    ) -> ChannelId {
        self.statistics.channels_created += 1;
        self.queue.new_channel(capability, description)
    }

    pub fn send(
        &mut self,
        channel: ChannelId,
        method: impl Into<InlineStr>,
        args: Vec<Value>,
    ) -> SubResult<()> {
        self.statistics.messages_sent += 1;
        self.queue.add_send(channel, method, args)
    }

    pub fn receive(&mut self, channel: ChannelId, closure: ClosureId) -> SubResult<()> {
        self.queue.add_receive(channel, closure, false)
    }

    /// Arms a receiver that survives its matches; used for always-on signal
    /// channels such as termination.
    pub fn receive_replicated(
        &mut self,
        channel: ChannelId,
        closure: ClosureId,
    ) -> SubResult<()> {
        self.queue.add_receive(channel, closure, true)
    }

    pub fn add_group(&mut self, group: CommGroup) -> SubResult<()> {
        self.queue.add_group(group)
    }

    pub fn register_closure(&mut self, record: ClosureRecord) -> ClosureId {
        self.queue.register_closure(record)
    }

    /// Spawns a sub-process: registers the closure and schedules its `run`
    /// method as a fresh reaction.
    pub fn instance(&mut self, closure: ClosureRecord) {
        self.statistics.reductions += 1;
        let id = self.queue.register_closure(closure);
        self.queue
            .enqueue_reaction(Continuation::new(id, RUN_METHOD, Vec::new()));
    }

    pub fn export_channel(&mut self, channel: ChannelId) -> SubResult<InlineStr> {
        self.queue.create_export(channel)
    }

    pub fn global_data(&self) -> &Value {
        self.queue.global_data()
    }

    pub fn set_global_data(&mut self, data: Value) {
        self.queue.set_global_data(data)
    }
}
