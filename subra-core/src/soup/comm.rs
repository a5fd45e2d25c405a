use serde::{Deserialize, Serialize};
use serde_json::Value;
use subra_common::prelude::*;

/// Identifies one rendezvous channel within a single soup. Ids are assigned
/// by the soup's object counter and are never reused for the lifetime of the
/// instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChannelId(pub u32);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one closure in the soup's arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ClosureId(pub u32);

impl std::fmt::Display for ClosureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// An activity-state object held in the soup's closure arena. `kind` selects
/// the handler in the registry; `state` is whatever serialized instance data
/// that handler needs when a message arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureRecord {
    pub kind: InlineStr,
    pub state: Value,
}

impl ClosureRecord {
    pub fn new(kind: impl Into<InlineStr>, state: Value) -> Self {
        Self {
            kind: kind.into(),
            state,
        }
    }
}

/// One side of a pending communication: a call waiting for a receiver, or a
/// receiver waiting for a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Comm {
    Send {
        channel: ChannelId,
        method: InlineStr,
        args: Vec<Value>,
    },
    Recv {
        channel: ChannelId,
        closure: ClosureId,
    },
}

impl Comm {
    pub fn channel(&self) -> ChannelId {
        match self {
            Comm::Send { channel, .. } => *channel,
            Comm::Recv { channel, .. } => *channel,
        }
    }
}

/// A set of communications armed as one unit, e.g. the alternatives of a PICK.
/// A non-replicated group is wholly consumed the instant any member matches;
/// a replicated group's members survive their matches and can match again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommGroup {
    replicated: bool,
    elements: Vec<Comm>,
}

impl CommGroup {
    pub fn new(replicated: bool) -> Self {
        Self {
            replicated,
            elements: Vec::new(),
        }
    }

    pub fn add(&mut self, comm: Comm) {
        self.elements.push(comm);
    }

    pub fn is_replicated(&self) -> bool {
        self.replicated
    }

    pub fn elements(&self) -> &[Comm] {
        &self.elements
    }

    pub(crate) fn into_elements(self) -> Vec<Comm> {
        self.elements
    }
}

/// A matched communication scheduled for dispatch. Immutable once enqueued;
/// the method and arguments come from the send side, the closure from the
/// receive side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    pub closure: ClosureId,
    pub method: InlineStr,
    pub args: Vec<Value>,
    pub description: Option<InlineStr>,
}

impl Continuation {
    pub fn new(closure: ClosureId, method: impl Into<InlineStr>, args: Vec<Value>) -> Self {
        Self {
            closure,
            method: method.into(),
            args,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<InlineStr>) -> Self {
        self.description = Some(description.into());
        self
    }
}
