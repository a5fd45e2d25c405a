use serde::{Deserialize, Serialize};
use serde_json::Value;
use subra_common::prelude::*;

use super::comm::{ChannelId, ClosureId, ClosureRecord, Comm, CommGroup, Continuation};
use super::replacement::ReplacementMap;
use super::snapshot::{self, SoupImage};
use crate::metrics::Monitors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct GroupId(pub u32);

/// A call parked on a channel, waiting for a receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MessageFrame {
    pub group: GroupId,
    pub method: InlineStr,
    pub args: Vec<Value>,
}

/// A receiver parked on a channel, waiting for a call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct ObjectFrame {
    pub group: GroupId,
    pub closure: ClosureId,
}

/// Per-channel pending-communication state. Sends and receives are kept in
/// registration order; the front of each queue is the oldest party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChannelFrame {
    pub id: ChannelId,
    pub capability: InlineStr,
    pub description: Option<InlineStr>,
    /// External by-id references (exports); a channel with a positive count
    /// stays alive even with no pending communications.
    pub ref_count: u32,
    pub replicated_send: bool,
    pub replicated_recv: bool,
    pub sends: VecDeque<MessageFrame>,
    pub recvs: VecDeque<ObjectFrame>,
}

/// The unit of cancellation: all communications armed together. Removing a
/// group removes every member frame it parked, on every channel it touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GroupFrame {
    pub replicated: bool,
    pub channels: Vec<ChannelId>,
}

/// The "soup": one process instance's suspended execution state, held as
/// pending communications plus scheduled reactions instead of a call stack.
///
/// Single-writer. The engine guarantees only one thread mutates a given
/// instance's soup at a time; nothing in here blocks or synchronizes.
pub struct ExecutionQueue {
    channels: BTreeMap<ChannelId, ChannelFrame>,
    groups: BTreeMap<GroupId, GroupFrame>,
    closures: BTreeMap<ClosureId, ClosureRecord>,
    reactions: VecDeque<Continuation>,
    global_data: Value,
    obj_id_counter: u32,
    current_cycle: u32,
    replacement: Option<Arc<dyn ReplacementMap>>,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
            groups: BTreeMap::new(),
            closures: BTreeMap::new(),
            reactions: VecDeque::new(),
            global_data: Value::Null,
            obj_id_counter: 0,
            current_cycle: 0,
            replacement: None,
        }
    }

    pub fn set_replacement_map(&mut self, map: Arc<dyn ReplacementMap>) {
        self.replacement = Some(map);
    }

    fn next_id(&mut self) -> u32 {
        self.obj_id_counter += 1;
        self.obj_id_counter
    }

    pub fn new_channel(
        &mut self,
        capability: impl Into<InlineStr>,
        description: Option<&str>,
    ) -> ChannelId {
        let id = ChannelId(self.next_id());
        let capability = capability.into();
        trace!("new channel {} [{}]", id, capability);
        Monitors::record_channel_created(capability.as_str());
        self.channels.insert(
            id,
            ChannelFrame {
                id,
                capability,
                description: description.map(Into::into),
                ref_count: 0,
                replicated_send: false,
                replicated_recv: false,
                sends: VecDeque::new(),
                recvs: VecDeque::new(),
            },
        );
        id
    }

    pub fn register_closure(&mut self, record: ClosureRecord) -> ClosureId {
        let id = ClosureId(self.next_id());
        trace!("register closure {} kind={}", id, record.kind);
        self.closures.insert(id, record);
        id
    }

    pub fn closure(&self, id: ClosureId) -> SubResult<&ClosureRecord> {
        self.closures
            .get(&id)
            .ok_or_else(|| ErrorCode::NotFound(format!("no such closure; id={}", id)))
    }

    /// Registers every member of `group` and then runs matching on each
    /// channel the group touched. All members are validated before any is
    /// parked, so a rejected group leaves the soup unchanged.
    pub fn add_group(&mut self, group: CommGroup) -> SubResult<()> {
        trace!("add group of {} comm(s)", group.elements().len());

        let replicated = group.is_replicated();
        let mut seen_send: HashSet<ChannelId> = HashSet::new();
        let mut seen_recv: HashSet<ChannelId> = HashSet::new();
        for comm in group.elements() {
            match comm {
                Comm::Send { channel, .. } => {
                    let frame = self.channel_frame(*channel)?;
                    if frame.replicated_send || (replicated && !seen_send.insert(*channel)) {
                        return fmt_err!(
                            IllegalState,
                            "send attempted on channel {} that already carries a replicated send",
                            channel
                        );
                    }
                }
                Comm::Recv { channel, closure } => {
                    let frame = self.channel_frame(*channel)?;
                    if frame.replicated_recv || (replicated && !seen_recv.insert(*channel)) {
                        return fmt_err!(
                            IllegalState,
                            "receive attempted on channel {} that already carries a replicated receive",
                            channel
                        );
                    }
                    if !self.closures.contains_key(closure) {
                        return fmt_err!(IllegalArgument, "no such closure; id={}", closure);
                    }
                }
            }
        }

        let gid = GroupId(self.next_id());
        let mut touched = Vec::new();
        for comm in group.into_elements() {
            let channel = comm.channel();
            // validated above, the frame is present
            let Some(frame) = self.channels.get_mut(&channel) else {
                continue;
            };
            match comm {
                Comm::Send { method, args, .. } => {
                    if replicated {
                        frame.replicated_send = true;
                    }
                    frame.sends.push_back(MessageFrame {
                        group: gid,
                        method,
                        args,
                    });
                }
                Comm::Recv { closure, .. } => {
                    if replicated {
                        frame.replicated_recv = true;
                    }
                    frame.recvs.push_back(ObjectFrame {
                        group: gid,
                        closure,
                    });
                }
            }
            touched.push(channel);
        }
        self.groups.insert(
            gid,
            GroupFrame {
                replicated,
                channels: touched.clone(),
            },
        );

        for channel in touched {
            self.match_communications(channel);
        }
        Ok(())
    }

    /// Registers a lone call; matches immediately when a receiver is already
    /// parked on the channel.
    pub fn add_send(
        &mut self,
        channel: ChannelId,
        method: impl Into<InlineStr>,
        args: Vec<Value>,
    ) -> SubResult<()> {
        let mut group = CommGroup::new(false);
        group.add(Comm::Send {
            channel,
            method: method.into(),
            args,
        });
        self.add_group(group)
    }

    /// Registers a lone receiver; matches immediately when a call is already
    /// parked on the channel. A replicated receiver survives its matches and
    /// can be matched indefinitely (always-on signal channels).
    pub fn add_receive(
        &mut self,
        channel: ChannelId,
        closure: ClosureId,
        replicated: bool,
    ) -> SubResult<()> {
        let mut group = CommGroup::new(replicated);
        group.add(Comm::Recv { channel, closure });
        self.add_group(group)
    }

    pub fn enqueue_reaction(&mut self, continuation: Continuation) {
        trace!(
            "enqueue reaction {}.{}",
            continuation.closure,
            continuation.method
        );
        self.reactions.push_back(continuation);
    }

    /// Pops the oldest scheduled reaction. Reactions dequeue strictly in
    /// enqueue order; replaying a log of dequeues reproduces identical
    /// process behavior.
    pub fn dequeue_reaction(&mut self) -> SubResult<Continuation> {
        match self.reactions.pop_front() {
            Some(continuation) => Ok(continuation),
            None => str_err!(EmptyQueue, "no scheduled reactions"),
        }
    }

    pub fn has_reactions(&self) -> bool {
        !self.reactions.is_empty()
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.len()
    }

    pub fn pending_send_count(&self) -> usize {
        self.channels.values().map(|frame| frame.sends.len()).sum()
    }

    pub fn pending_receive_count(&self) -> usize {
        self.channels.values().map(|frame| frame.recvs.len()).sum()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// True iff the instance has nothing left to do: no pending sends or
    /// receives, no queued reactions, and no channel still referenced from
    /// outside the soup.
    pub fn is_complete(&self) -> bool {
        if !self.reactions.is_empty() {
            return false;
        }
        self.channels.values().all(|frame| {
            frame.ref_count == 0 && frame.sends.is_empty() && frame.recvs.is_empty()
        })
    }

    /// Advances and returns the cycle counter. The engine stamps each
    /// dispatch with it to detect torn checkpoints.
    pub fn cycle(&mut self) -> u32 {
        self.current_cycle += 1;
        self.current_cycle
    }

    pub fn current_cycle(&self) -> u32 {
        self.current_cycle
    }

    /// Hands out a by-id reference to `channel` for parties outside the soup
    /// (correlation entries, scheduled jobs). The channel stays alive until
    /// every export is consumed.
    pub fn create_export(&mut self, channel: ChannelId) -> SubResult<InlineStr> {
        let frame = self.channel_frame_mut(channel)?;
        frame.ref_count += 1;
        Ok(format!("{}", channel.0).into())
    }

    pub fn consume_export(&mut self, export_id: &str) -> SubResult<ChannelId> {
        let id: u32 = export_id.parse().map_err(|_| {
            ErrorCode::IllegalArgument(format!("malformed channel export '{}'", export_id))
        })?;
        let frame = self.channel_frame_mut(ChannelId(id))?;
        if frame.ref_count == 0 {
            warn!("consume of channel {} with no outstanding exports", frame.id);
        } else {
            frame.ref_count -= 1;
        }
        Ok(frame.id)
    }

    /// Opaque engine bookkeeping carried with the instance across
    /// checkpoints (e.g. serialized correlation state).
    pub fn set_global_data(&mut self, data: Value) {
        self.global_data = data;
    }

    pub fn global_data(&self) -> &Value {
        &self.global_data
    }

    /// Serializes the whole soup for checkpointing. Unreferenced channels and
    /// closures are garbage-collected first; the substitution hook, when set,
    /// replaces registered shared values with small references on the way
    /// out.
    pub fn snapshot(&mut self) -> SubResult<Vec<u8>> {
        self.gc();
        let mut image = self.to_image();
        if let Some(map) = self.replacement.as_ref() {
            image.apply_outbound(map.as_ref());
        }
        let bytes = snapshot::encode(&image)?;
        Monitors::record_snapshot_bytes(bytes.len());
        debug!(
            "snapshot: {} channel(s), {} reaction(s), {} byte(s)",
            self.channels.len(),
            self.reactions.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Replaces the live soup with the state in `bytes`. All-or-nothing: the
    /// image is fully decoded and validated before anything is touched, so a
    /// corrupt snapshot leaves the live soup exactly as it was.
    pub fn restore(&mut self, bytes: &[u8]) -> SubResult<()> {
        let mut image = snapshot::decode(bytes)?;
        if let Some(map) = self.replacement.as_ref() {
            image.apply_inbound(map.as_ref());
        }
        let state = image.into_state()?;

        self.channels = state.channels;
        self.groups = state.groups;
        self.closures = state.closures;
        self.reactions = state.reactions;
        self.global_data = state.global_data;
        self.obj_id_counter = state.obj_id_counter;
        self.current_cycle = state.current_cycle;
        Ok(())
    }

    /// Logs a summary of the soup for debugging.
    pub fn dump_state(&self) {
        info!(
            "soup state: cycle={} channels={} groups={} closures={} reactions={}",
            self.current_cycle,
            self.channels.len(),
            self.groups.len(),
            self.closures.len(),
            self.reactions.len()
        );
        for (cnt, continuation) in self.reactions.iter().enumerate() {
            debug!(
                "   #{}: {}.{}",
                cnt + 1,
                continuation.closure,
                continuation.method
            );
        }
    }

    fn channel_frame(&self, id: ChannelId) -> SubResult<&ChannelFrame> {
        self.channels
            .get(&id)
            .ok_or_else(|| ErrorCode::IllegalArgument(format!("no such channel; id={}", id)))
    }

    fn channel_frame_mut(&mut self, id: ChannelId) -> SubResult<&mut ChannelFrame> {
        self.channels
            .get_mut(&id)
            .ok_or_else(|| ErrorCode::IllegalArgument(format!("no such channel; id={}", id)))
    }

    /// Pairs parked parties on `channel` until one side runs dry. The oldest
    /// send meets the oldest receive; each match consumes the two groups
    /// involved unless a group is replicated, in which case its members stay
    /// parked and can match again.
    fn match_communications(&mut self, channel: ChannelId) {
        loop {
            let (continuation, send_group, recv_group) = {
                let Some(frame) = self.channels.get(&channel) else {
                    return;
                };
                let (Some(send), Some(recv)) = (frame.sends.front(), frame.recvs.front()) else {
                    return;
                };
                let mut continuation =
                    Continuation::new(recv.closure, send.method.clone(), send.args.clone());
                if log_enabled!(LogLevelDebug) {
                    continuation = continuation.with_description(format!(
                        "{} ? {{...}} | {} ! {}(...)",
                        channel, channel, send.method
                    ));
                }
                (continuation, send.group, recv.group)
            };

            let send_replicated = self
                .groups
                .get(&send_group)
                .map(|g| g.replicated)
                .unwrap_or(false);
            let recv_replicated = self
                .groups
                .get(&recv_group)
                .map(|g| g.replicated)
                .unwrap_or(false);

            Monitors::record_match(channel.0);
            self.enqueue_reaction(continuation);
            if !send_replicated {
                self.remove_group(send_group);
            }
            if !recv_replicated {
                self.remove_group(recv_group);
            }
            if send_replicated && recv_replicated {
                // both parties are permanent; pairing them again would spin
                warn!("channel {} is replicated on both sides, matched once", channel);
                return;
            }
        }
    }

    fn remove_group(&mut self, gid: GroupId) {
        let Some(group) = self.groups.remove(&gid) else {
            return;
        };
        for channel in group.channels {
            if let Some(frame) = self.channels.get_mut(&channel) {
                frame.sends.retain(|send| send.group != gid);
                frame.recvs.retain(|recv| recv.group != gid);
            }
        }
    }

    /// Drops channels nothing references and closures no parked receiver or
    /// queued reaction points at. Groups need no collection of their own: a
    /// group lives exactly as long as its parked frames do.
    fn gc(&mut self) {
        let mut live_closures: HashSet<ClosureId> = HashSet::new();
        for frame in self.channels.values() {
            live_closures.extend(frame.recvs.iter().map(|recv| recv.closure));
        }
        live_closures.extend(self.reactions.iter().map(|reaction| reaction.closure));
        self.closures.retain(|id, _| {
            let keep = live_closures.contains(id);
            if !keep {
                debug!("gc closure {}", id);
            }
            keep
        });
        self.channels.retain(|id, frame| {
            let keep =
                frame.ref_count > 0 || !frame.sends.is_empty() || !frame.recvs.is_empty();
            if !keep {
                debug!("gc channel {}", id);
            }
            keep
        });
    }

    fn to_image(&self) -> SoupImage {
        SoupImage {
            version: snapshot::SOUP_FORMAT_VERSION,
            obj_id_counter: self.obj_id_counter,
            current_cycle: self.current_cycle,
            reactions: self.reactions.iter().cloned().collect(),
            channels: self.channels.values().cloned().collect(),
            groups: self.groups.iter().map(|(id, g)| (*id, g.clone())).collect(),
            closures: self
                .closures
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect(),
            global_data: self.global_data.clone(),
        }
    }
}

impl Default for ExecutionQueue {
    fn default() -> Self {
        Self::new()
    }
}
