//! Subscription Registry
//!
//! Tracks which instruments are subscribed on the live feed and turns
//! subscribe/unsubscribe calls into batched control requests.
//!
//! # Design
//!
//! Planning and committing are separate steps. [`SubscriptionRegistry::add`]
//! and [`SubscriptionRegistry::remove`] only build requests; the connection
//! commits each one with [`SubscriptionRegistry::apply`] once its frame has
//! been written. The tracked set therefore only contains instruments whose
//! subscribe frame actually went out.
//!
//! The server accepts at most [`MAX_INSTRUMENTS_PER_REQUEST`] instruments per
//! control frame, and the request code depends on the subscription type, so
//! requests are grouped by type and then chunked.
//!
//! The registry is not synchronised; callers guard it.

use std::collections::{BTreeMap, HashSet};

use crate::domain::instrument::{Instrument, InstrumentKey, RequestCode, SubscriptionType};

/// Server ceiling on instruments per control frame.
pub const MAX_INSTRUMENTS_PER_REQUEST: usize = 100;

// =============================================================================
// Subscription Request
// =============================================================================

/// One control frame worth of subscribe or unsubscribe work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Request code sent to the server.
    pub request_code: RequestCode,
    /// Instruments in this frame (at most 100).
    pub instruments: Vec<Instrument>,
}

impl SubscriptionRequest {
    /// Number of instruments in the request.
    #[must_use]
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the request subscribes.
    #[must_use]
    pub const fn is_subscribe(&self) -> bool {
        self.request_code.is_subscribe()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Set of subscribed instruments keyed by `(segment, security_id)`.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    instruments: BTreeMap<InstrumentKey, Instrument>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build subscribe requests for `instruments`.
    ///
    /// Already tracked instruments are included again; the vendor expects
    /// repeated subscribes to be harmless. An instrument tracked under a
    /// different subscription type is first unsubscribed with its old type,
    /// so the server stops streaming it.
    #[must_use]
    pub fn add(&self, instruments: &[Instrument]) -> Vec<SubscriptionRequest> {
        let superseded = instruments.iter().filter_map(|inst| {
            self.instruments
                .get(&inst.key())
                .filter(|tracked| tracked.subscription_type != inst.subscription_type)
                .cloned()
        });

        let mut requests = build_requests(superseded, SubscriptionType::unsubscribe_code);
        requests.extend(build_requests(
            instruments.iter().cloned(),
            SubscriptionType::subscribe_code,
        ));
        requests
    }

    /// Build unsubscribe requests for `instruments`.
    ///
    /// Tracked instruments are unsubscribed with the type they were
    /// subscribed with. Untracked instruments still produce frames using the
    /// type supplied by the caller.
    #[must_use]
    pub fn remove(&self, instruments: &[Instrument]) -> Vec<SubscriptionRequest> {
        let resolved = instruments.iter().map(|inst| {
            self.instruments
                .get(&inst.key())
                .cloned()
                .unwrap_or_else(|| inst.clone())
        });

        build_requests(resolved, SubscriptionType::unsubscribe_code)
    }

    /// Commit a request whose frame has been written.
    pub fn apply(&mut self, request: &SubscriptionRequest) {
        if request.is_subscribe() {
            for inst in &request.instruments {
                self.instruments.insert(inst.key(), inst.clone());
            }
        } else {
            for inst in &request.instruments {
                self.instruments.remove(&inst.key());
            }
        }
    }

    /// Requests that restore every tracked subscription.
    #[must_use]
    pub fn resubscribe_requests(&self) -> Vec<SubscriptionRequest> {
        build_requests(
            self.instruments.values().cloned(),
            SubscriptionType::subscribe_code,
        )
    }

    /// Requests that drop every tracked subscription.
    #[must_use]
    pub fn unsubscribe_all_requests(&self) -> Vec<SubscriptionRequest> {
        build_requests(
            self.instruments.values().cloned(),
            SubscriptionType::unsubscribe_code,
        )
    }

    /// Whether the instrument (by identity) is tracked.
    #[must_use]
    pub fn contains(&self, instrument: &Instrument) -> bool {
        self.instruments.contains_key(&instrument.key())
    }

    /// Copy of the tracked instruments.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Instrument> {
        self.instruments.values().cloned().collect()
    }

    /// Number of tracked instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Forget every tracked instrument.
    pub fn clear(&mut self) {
        self.instruments.clear();
    }
}

/// Group by subscription type (first-seen order), drop duplicate identities
/// within a group, then chunk.
fn build_requests(
    instruments: impl IntoIterator<Item = Instrument>,
    code_for: fn(SubscriptionType) -> RequestCode,
) -> Vec<SubscriptionRequest> {
    let mut groups: Vec<(SubscriptionType, Vec<Instrument>)> = Vec::new();
    let mut seen: HashSet<(SubscriptionType, InstrumentKey)> = HashSet::new();

    for inst in instruments {
        if !seen.insert((inst.subscription_type, inst.key())) {
            continue;
        }

        match groups
            .iter_mut()
            .find(|(kind, _)| *kind == inst.subscription_type)
        {
            Some((_, members)) => members.push(inst),
            None => groups.push((inst.subscription_type, vec![inst])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(kind, members)| {
            let request_code = code_for(kind);
            members
                .chunks(MAX_INSTRUMENTS_PER_REQUEST)
                .map(|chunk| SubscriptionRequest {
                    request_code,
                    instruments: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
