use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subra_common::prelude::*;

use super::comm::{ChannelId, ClosureId, ClosureRecord, Continuation};
use super::execution_queue::{ChannelFrame, GroupFrame, GroupId};
use super::replacement::ReplacementMap;

/// Bumped whenever the persisted layout changes; restore rejects images
/// written under a different layout.
pub(crate) const SOUP_FORMAT_VERSION: u32 = 1;

/// The serialized form of a whole soup. Collections are stored as ordered
/// vectors so an image round-trips deterministically.
#[derive(Serialize, Deserialize)]
pub(crate) struct SoupImage {
    pub version: u32,
    pub obj_id_counter: u32,
    pub current_cycle: u32,
    pub reactions: Vec<Continuation>,
    pub channels: Vec<ChannelFrame>,
    pub groups: Vec<(GroupId, GroupFrame)>,
    pub closures: Vec<(ClosureId, ClosureRecord)>,
    pub global_data: Value,
}

/// A fully validated image, ready to swap into a live soup.
pub(crate) struct RestoredState {
    pub obj_id_counter: u32,
    pub current_cycle: u32,
    pub reactions: VecDeque<Continuation>,
    pub channels: BTreeMap<ChannelId, ChannelFrame>,
    pub groups: BTreeMap<GroupId, GroupFrame>,
    pub closures: BTreeMap<ClosureId, ClosureRecord>,
    pub global_data: Value,
}

impl SoupImage {
    fn apply_all<F: Fn(&Value) -> Option<Value>>(&mut self, substitute: F) {
        for (_, record) in self.closures.iter_mut() {
            if let Some(replacement) = substitute(&record.state) {
                record.state = replacement;
            }
        }
        for frame in self.channels.iter_mut() {
            for send in frame.sends.iter_mut() {
                for arg in send.args.iter_mut() {
                    if let Some(replacement) = substitute(arg) {
                        *arg = replacement;
                    }
                }
            }
        }
        for reaction in self.reactions.iter_mut() {
            for arg in reaction.args.iter_mut() {
                if let Some(replacement) = substitute(arg) {
                    *arg = replacement;
                }
            }
        }
        if let Some(replacement) = substitute(&self.global_data) {
            self.global_data = replacement;
        }
    }

    /// Applies the substitution hook to every persisted payload on the way
    /// out: closure state, parked send arguments, reaction arguments, and
    /// the global data slot.
    pub fn apply_outbound(&mut self, map: &dyn ReplacementMap) {
        self.apply_all(|value| map.replace(value));
    }

    pub fn apply_inbound(&mut self, map: &dyn ReplacementMap) {
        self.apply_all(|value| map.restore(value));
    }

    /// Validates the image and converts it to live-soup shape. Duplicate ids
    /// and dangling references mean the snapshot was torn or written by a
    /// different engine; nothing from such an image may reach the live soup.
    pub fn into_state(self) -> SubResult<RestoredState> {
        let mut channels: BTreeMap<ChannelId, ChannelFrame> = BTreeMap::new();
        for frame in self.channels {
            if frame.id.0 > self.obj_id_counter {
                return fmt_err!(
                    CorruptState,
                    "channel {} beyond id counter {}",
                    frame.id,
                    self.obj_id_counter
                );
            }
            let id = frame.id;
            if channels.insert(id, frame).is_some() {
                return fmt_err!(CorruptState, "duplicate channel id {}", id);
            }
        }

        let mut groups: BTreeMap<GroupId, GroupFrame> = BTreeMap::new();
        for (id, group) in self.groups {
            if groups.insert(id, group).is_some() {
                return fmt_err!(CorruptState, "duplicate group id {}", id.0);
            }
        }

        let mut closures: BTreeMap<ClosureId, ClosureRecord> = BTreeMap::new();
        for (id, record) in self.closures {
            if id.0 > self.obj_id_counter {
                return fmt_err!(
                    CorruptState,
                    "closure {} beyond id counter {}",
                    id,
                    self.obj_id_counter
                );
            }
            if closures.insert(id, record).is_some() {
                return fmt_err!(CorruptState, "duplicate closure id {}", id);
            }
        }

        for frame in channels.values() {
            for send in &frame.sends {
                if !groups.contains_key(&send.group) {
                    return fmt_err!(
                        CorruptState,
                        "send on channel {} references unknown group {}",
                        frame.id,
                        send.group.0
                    );
                }
            }
            for recv in &frame.recvs {
                if !groups.contains_key(&recv.group) {
                    return fmt_err!(
                        CorruptState,
                        "receive on channel {} references unknown group {}",
                        frame.id,
                        recv.group.0
                    );
                }
                if !closures.contains_key(&recv.closure) {
                    return fmt_err!(
                        CorruptState,
                        "receive on channel {} references unknown closure {}",
                        frame.id,
                        recv.closure
                    );
                }
            }
        }
        for (id, group) in &groups {
            for channel in &group.channels {
                if !channels.contains_key(channel) {
                    return fmt_err!(
                        CorruptState,
                        "group {} references unknown channel {}",
                        id.0,
                        channel
                    );
                }
            }
        }
        for reaction in &self.reactions {
            if !closures.contains_key(&reaction.closure) {
                return fmt_err!(
                    CorruptState,
                    "reaction references unknown closure {}",
                    reaction.closure
                );
            }
        }

        Ok(RestoredState {
            obj_id_counter: self.obj_id_counter,
            current_cycle: self.current_cycle,
            reactions: self.reactions.into(),
            channels,
            groups,
            closures,
            global_data: self.global_data,
        })
    }
}

pub(crate) fn encode(image: &SoupImage) -> SubResult<Vec<u8>> {
    let body = serde_json::to_vec(image)
        .map_err(|e| ErrorCode::IllegalState(format!("soup serialization failed: {}", e)))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&body)
        .map_err(|e| ErrorCode::IllegalState(format!("soup compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| ErrorCode::IllegalState(format!("soup compression failed: {}", e)))
}

pub(crate) fn decode(bytes: &[u8]) -> SubResult<SoupImage> {
    let mut body = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut body)
        .map_err(|e| ErrorCode::CorruptState(format!("snapshot is not a valid soup stream: {}", e)))?;
    let image: SoupImage = serde_json::from_slice(&body)
        .map_err(|e| ErrorCode::CorruptState(format!("snapshot does not decode: {}", e)))?;
    if image.version != SOUP_FORMAT_VERSION {
        return fmt_err!(
            CorruptState,
            "unsupported soup format version {}",
            image.version
        );
    }
    Ok(image)
}
