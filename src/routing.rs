//! # Routing Policy
//!
//! Channel selection for MT submissions. A submission's destination phone is
//! classified by its 3-digit prefix into one of the three carriers; the
//! peer's channel list is then walked in load order and the first channel
//! that admits the carrier and has headroom in its gateway queue wins.
//!
//! The policy is a pure function of the channel list, the phone, and the
//! current queue depths — there is no weighting or randomization in the
//! dispatch path (`weight` is carried for future use).

use std::sync::Arc;

use bitflags::bitflags;

use crate::defaults;
use crate::pool::{Queue, QueuePool};

bitflags! {
    /// Carrier capability mask of a gateway channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperatorSet: u32 {
        const CMCC = 0b0001;
        const CTCC = 0b0010;
        const CUCC = 0b0100;
        const MVNO = 0b1000;
    }
}

/// The three prefix-classified carriers. Phones outside every prefix table
/// have no `Carrier` and only match channels with the MVNO bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Cmcc,
    Ctcc,
    Cucc,
}

const CMCC_PREFIXES: &[&str] = &[
    "134", "135", "136", "137", "138", "139", "147", "150", "151", "152", "157", "158", "159",
    "178", "182", "183", "184", "187", "188", "198",
];

const CTCC_PREFIXES: &[&str] = &["133", "149", "153", "173", "177", "180", "181", "189", "199"];

const CUCC_PREFIXES: &[&str] = &[
    "130", "131", "132", "155", "156", "145", "175", "176", "185", "186", "166",
];

/// Classify a phone number by its leading three digits.
pub fn carrier_of(phone: &str) -> Option<Carrier> {
    let prefix = phone.get(..3)?;

    if CMCC_PREFIXES.contains(&prefix) {
        Some(Carrier::Cmcc)
    } else if CTCC_PREFIXES.contains(&prefix) {
        Some(Carrier::Ctcc)
    } else if CUCC_PREFIXES.contains(&prefix) {
        Some(Carrier::Cucc)
    } else {
        None
    }
}

/// A downstream gateway channel as configured for one peer account.
///
/// Loaded once per producer session start, in database order; that order is
/// the routing tie-break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: u32,
    pub acc: u32,
    pub weight: u32,
    pub operator: OperatorSet,
    /// Reserved for geography rules; carried but never consulted.
    pub province: u32,
}

impl Channel {
    /// Does this channel's capability mask admit the phone's carrier?
    /// The MVNO bit is the fallthrough match for unclassified prefixes.
    pub fn admits_operator(&self, phone: &str) -> bool {
        match carrier_of(phone) {
            Some(Carrier::Cmcc) => self.operator.contains(OperatorSet::CMCC),
            Some(Carrier::Ctcc) => self.operator.contains(OperatorSet::CTCC),
            Some(Carrier::Cucc) => self.operator.contains(OperatorSet::CUCC),
            None => self.operator.contains(OperatorSet::MVNO),
        }
    }

    /// Province matching is inert until geography rules are specified.
    pub fn admits_province(&self, _phone: &str) -> bool {
        true
    }
}

/// Outcome of a routing pass, mirrored one-to-one onto the ack alphabet.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// A channel accepted; push to this gateway queue and ack `OK`.
    Accept(Arc<Queue>),
    /// The peer has no channels configured at all.
    NoRoute,
    /// No channel admits the destination's carrier.
    Reject,
    /// At least one channel matched, but every match was over capacity
    /// (or its gateway queue does not exist yet).
    Busy,
}

/// Walk the channel list in order and pick the first acceptable gateway
/// queue for the destination phone.
pub fn select_route(channels: &[Channel], phone: &str, pool: &QueuePool) -> RouteDecision {
    if channels.is_empty() {
        return RouteDecision::NoRoute;
    }

    let mut matched = false;

    for channel in channels {
        if !channel.admits_operator(phone) {
            continue;
        }
        if !channel.admits_province(phone) {
            continue;
        }
        matched = true;

        // Capacity check: a missing queue means no gateway worker has
        // attached yet; skip it the same way as a saturated one.
        if let Some(queue) = pool.find(channel.id) {
            if queue.len() < defaults::QUEUE_DEPTH_LIMIT {
                return RouteDecision::Accept(queue);
            }
        }
    }

    if matched {
        RouteDecision::Busy
    } else {
        RouteDecision::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::QueueItem;
    use crate::proto::Submit;

    fn channel(id: u32, operator: OperatorSet) -> Channel {
        Channel {
            id,
            acc: 7,
            weight: 1,
            operator,
            province: 0,
        }
    }

    fn submit(phone: &str) -> QueueItem {
        QueueItem::Submit(Submit {
            id: 1,
            account: 7,
            company: 1,
            spid: "100861".into(),
            spcode: "10086".into(),
            phone: phone.into(),
            msgfmt: 0,
            length: 2,
            content: b"hi".to_vec(),
        })
    }

    #[test]
    fn prefixes_classify_carriers() {
        assert_eq!(carrier_of("13800000000"), Some(Carrier::Cmcc));
        assert_eq!(carrier_of("19800000000"), Some(Carrier::Cmcc));
        assert_eq!(carrier_of("13300000000"), Some(Carrier::Ctcc));
        assert_eq!(carrier_of("19900000000"), Some(Carrier::Ctcc));
        assert_eq!(carrier_of("13000000000"), Some(Carrier::Cucc));
        assert_eq!(carrier_of("16600000000"), Some(Carrier::Cucc));

        // Outside every table, including numbers too short to classify.
        assert_eq!(carrier_of("17000000000"), None);
        assert_eq!(carrier_of("16200000000"), None);
        assert_eq!(carrier_of("13"), None);
        assert_eq!(carrier_of(""), None);
    }

    #[test]
    fn operator_mask_gates_classified_phones() {
        let cmcc_only = channel(100, OperatorSet::CMCC);
        assert!(cmcc_only.admits_operator("13800000000"));
        assert!(!cmcc_only.admits_operator("13300000000"));
        assert!(!cmcc_only.admits_operator("13000000000"));

        // MVNO is the fallthrough, not a wildcard: a classified phone still
        // needs its carrier bit.
        let mvno_only = channel(101, OperatorSet::MVNO);
        assert!(!mvno_only.admits_operator("13800000000"));
        assert!(mvno_only.admits_operator("17000000000"));

        let combined = channel(102, OperatorSet::CMCC | OperatorSet::MVNO);
        assert!(combined.admits_operator("13800000000"));
        assert!(combined.admits_operator("17000000000"));
        assert!(!combined.admits_operator("13300000000"));
    }

    #[test]
    fn empty_channel_list_has_no_route() {
        let pool = QueuePool::new();
        assert!(matches!(
            select_route(&[], "13800000000", &pool),
            RouteDecision::NoRoute
        ));
    }

    #[test]
    fn unmatched_operator_rejects() {
        let pool = QueuePool::new();
        pool.find_or_create(100);
        let channels = [channel(100, OperatorSet::CMCC)];

        assert!(matches!(
            select_route(&channels, "13300000000", &pool),
            RouteDecision::Reject
        ));
    }

    #[test]
    fn matched_channel_without_queue_is_busy() {
        let pool = QueuePool::new();
        let channels = [channel(100, OperatorSet::CMCC)];

        assert!(matches!(
            select_route(&channels, "13800000000", &pool),
            RouteDecision::Busy
        ));
    }

    #[test]
    fn depth_threshold_is_exact() {
        let pool = QueuePool::new();
        let queue = pool.find_or_create(100);
        let channels = [channel(100, OperatorSet::CMCC)];

        for _ in 0..defaults::QUEUE_DEPTH_LIMIT - 1 {
            queue.push(submit("13800000000"));
        }

        // Depth 127 accepts one more.
        match select_route(&channels, "13800000000", &pool) {
            RouteDecision::Accept(target) => target.push(submit("13800000000")),
            other => panic!("expected acceptance at depth 127, got {other:?}"),
        }

        // Depth 128 is backpressure.
        assert!(matches!(
            select_route(&channels, "13800000000", &pool),
            RouteDecision::Busy
        ));
    }

    #[test]
    fn first_acceptable_channel_wins() {
        let pool = QueuePool::new();
        let saturated = pool.find_or_create(100);
        for _ in 0..defaults::QUEUE_DEPTH_LIMIT {
            saturated.push(submit("13800000000"));
        }
        pool.find_or_create(200);

        let channels = [
            channel(100, OperatorSet::CMCC),
            channel(200, OperatorSet::CMCC),
        ];

        match select_route(&channels, "13800000000", &pool) {
            RouteDecision::Accept(target) => assert_eq!(target.id(), 200),
            other => panic!("expected overflow onto channel 200, got {other:?}"),
        }
    }

    #[test]
    fn decision_is_deterministic_for_fixed_depths() {
        let pool = QueuePool::new();
        pool.find_or_create(100);
        let channels = [channel(100, OperatorSet::CMCC | OperatorSet::CTCC)];

        for _ in 0..3 {
            assert!(matches!(
                select_route(&channels, "13300000000", &pool),
                RouteDecision::Accept(_)
            ));
            assert!(matches!(
                select_route(&channels, "13000000000", &pool),
                RouteDecision::Reject
            ));
        }
    }
}
