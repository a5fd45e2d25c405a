use serde::{Deserialize, Serialize};
use subra_common::prelude::*;

use crate::metrics::Monitors;

/// Identifies one partner-link instance: the partner link name qualified by
/// the scope instance that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartnerLinkInstance {
    pub scope_instance_id: i64,
    pub partner_link: InlineStr,
}

impl PartnerLinkInstance {
    pub fn new(scope_instance_id: i64, partner_link: impl Into<InlineStr>) -> Self {
        Self {
            scope_instance_id,
            partner_link: partner_link.into(),
        }
    }
}

impl std::fmt::Display for PartnerLinkInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.partner_link, self.scope_instance_id)
    }
}

/// One criterion a receive/pick is willing to match: partner link instance,
/// operation, and the receive/reply disambiguator. One-way selectors expect
/// no reply and never participate in conflict bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    pub plink_instance: PartnerLinkInstance,
    pub op_name: InlineStr,
    pub mex_id: InlineStr,
    pub one_way: bool,
}

impl Selector {
    pub fn new(
        plink_instance: PartnerLinkInstance,
        op_name: impl Into<InlineStr>,
        mex_id: impl Into<InlineStr>,
        one_way: bool,
    ) -> Self {
        Self {
            plink_instance,
            op_name: op_name.into(),
            mex_id: mex_id.into(),
            one_way,
        }
    }
}

/// Tuple identifying an outstanding request: a receive/pick on a
/// request-response operation still owing a reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestId {
    plink_instance: PartnerLinkInstance,
    op_name: InlineStr,
    mex_id: InlineStr,
}

impl RequestId {
    fn new(
        plink_instance: &PartnerLinkInstance,
        op_name: &str,
        mex_id: &str,
    ) -> Self {
        Self {
            plink_instance: plink_instance.clone(),
            op_name: op_name.into(),
            mex_id: mex_id.into(),
        }
    }

    fn of(selector: &Selector) -> Self {
        Self::new(
            &selector.plink_instance,
            &selector.op_name,
            &selector.mex_id,
        )
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{{}.{}/{}}}",
            self.plink_instance, self.op_name, self.mex_id
        )
    }
}

/// A registered receive/pick: its response channel, its armed selectors, and
/// the inbound exchange that satisfied it, once one has.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub response_channel: InlineStr,
    pub selectors: Vec<Selector>,
    pub mex_ref: Option<InlineStr>,
}

/// Manages receive/pick--reply matching. Tracks the pick/receive activities
/// the process has reached and their association with an inbound message
/// exchange, so (1) a reply can be routed to the registration it answers and
/// (2) exchanges never replied to can be faulted out when the registration
/// goes out of scope.
///
/// Only request-response (non-one-way) inbound operations need any of this.
/// Single-writer: the caller holds the per-instance lock.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(from = "OrmImage", into = "OrmImage")]
pub struct OutstandingRequestManager {
    by_channel: HashMap<InlineStr, CorrelationEntry>,
    by_rid: HashMap<RequestId, InlineStr>,
}

impl OutstandingRequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of the first selector in `selectors` that collides
    /// with another selector in the set or with an already-registered RID.
    /// Inspects only; never changes state.
    pub fn find_conflict(&self, selectors: &[Selector]) -> Option<usize> {
        let mut working_set: HashSet<RequestId> = self.by_rid.keys().cloned().collect();
        for (i, selector) in selectors.iter().enumerate() {
            if selector.one_way {
                continue;
            }
            if !working_set.insert(RequestId::of(selector)) {
                return Some(i);
            }
        }
        None
    }

    /// Registers a receive/pick reached in the process. A duplicate response
    /// channel or RID means the compiler/engine activated the same
    /// receive/pick twice; that is a bug upstream, not a business condition,
    /// and registration fails fatally.
    pub fn register(
        &mut self,
        response_channel: &str,
        selectors: Vec<Selector>,
    ) -> SubResult<()> {
        trace!(
            "register response_channel={} selectors={}",
            response_channel,
            selectors.len()
        );

        if self.by_channel.contains_key(&InlineStr::from(response_channel)) {
            error!(
                "INTERNAL ERROR: duplicate entry for response channel {}",
                response_channel
            );
            return fmt_err!(
                IllegalState,
                "duplicate entry for response channel {}",
                response_channel
            );
        }

        let mut rids = Vec::new();
        for selector in selectors.iter().filter(|s| !s.one_way) {
            let rid = RequestId::of(selector);
            if self.by_rid.contains_key(&rid) || rids.contains(&rid) {
                error!("INTERNAL ERROR: duplicate entry for RID {}", rid);
                return fmt_err!(IllegalState, "duplicate entry for RID {}", rid);
            }
            rids.push(rid);
        }

        let channel = InlineStr::from(response_channel);
        for rid in rids {
            self.by_rid.insert(rid, channel.clone());
        }
        self.by_channel.insert(
            channel,
            CorrelationEntry {
                response_channel: response_channel.into(),
                selectors,
                mex_ref: None,
            },
        );
        Monitors::record_registration_count(self.by_channel.len());
        Ok(())
    }

    /// Cancels a previous registration. Cancelling an already-satisfied or
    /// never-registered channel is benign.
    pub fn cancel(&mut self, response_channel: &str) {
        trace!("cancel response_channel={}", response_channel);

        if self
            .by_channel
            .remove(&InlineStr::from(response_channel))
            .is_some()
        {
            self.by_rid
                .retain(|_, channel| channel.as_str() != response_channel);
        } else {
            debug!(
                "cancel: no registration for response channel {}",
                response_channel
            );
        }
    }

    /// Associates the inbound exchange that satisfied a registration with it.
    /// For pub-sub deliveries an entry can legitimately be associated more
    /// than once; the last association wins.
    pub fn associate(&mut self, response_channel: &str, mex_ref: &str) -> SubResult<()> {
        trace!(
            "associate response_channel={} mex_ref={}",
            response_channel,
            mex_ref
        );

        match self.by_channel.get_mut(&InlineStr::from(response_channel)) {
            Some(entry) => {
                entry.mex_ref = Some(mex_ref.into());
                Ok(())
            }
            None => {
                error!(
                    "INTERNAL ERROR: no entry for response channel {}",
                    response_channel
                );
                fmt_err!(
                    IllegalArgument,
                    "no entry for response channel {}",
                    response_channel
                )
            }
        }
    }

    /// Releases the registration matching the given request identity; called
    /// when the reply for it goes out. Returns the associated exchange
    /// reference, or None when the RID is unknown (a late, duplicate, or
    /// already-handled reply, which is expected under races and not an error).
    pub fn release(
        &mut self,
        plink_instance: &PartnerLinkInstance,
        op_name: &str,
        mex_id: &str,
    ) -> Option<InlineStr> {
        let rid = RequestId::new(plink_instance, op_name, mex_id);
        let Some(channel) = self.by_rid.get(&rid).cloned() else {
            debug!("release: RID {} not registered (late or duplicate reply)", rid);
            Monitors::record_release_miss();
            return None;
        };
        let entry = self.by_channel.remove(&channel);
        self.by_rid.retain(|_, ch| *ch != channel);
        entry.and_then(|entry| entry.mex_ref)
    }

    /// Forgets every registration, returning the exchange reference of each
    /// entry that had received a message but was never replied to. Used at
    /// instance teardown so those exchanges can be faulted out instead of
    /// left hanging.
    pub fn release_all(&mut self) -> Vec<InlineStr> {
        trace!("release_all ({} registration(s))", self.by_channel.len());

        let mex_refs = self
            .by_channel
            .values()
            .filter_map(|entry| entry.mex_ref.clone())
            .collect();
        self.by_channel.clear();
        self.by_rid.clear();
        mex_refs
    }

    pub fn registration_count(&self) -> usize {
        self.by_channel.len()
    }
}

/// Serialized shape: the entries alone. The RID index is derivable and is
/// rebuilt on deserialization.
#[derive(Serialize, Deserialize)]
struct OrmImage {
    entries: Vec<CorrelationEntry>,
}

impl From<OutstandingRequestManager> for OrmImage {
    fn from(manager: OutstandingRequestManager) -> Self {
        Self {
            entries: manager.by_channel.into_values().collect(),
        }
    }
}

impl From<OrmImage> for OutstandingRequestManager {
    fn from(image: OrmImage) -> Self {
        let mut manager = OutstandingRequestManager::default();
        for entry in image.entries {
            for selector in entry.selectors.iter().filter(|s| !s.one_way) {
                manager
                    .by_rid
                    .insert(RequestId::of(selector), entry.response_channel.clone());
            }
            manager
                .by_channel
                .insert(entry.response_channel.clone(), entry);
        }
        manager
    }
}
