//! Offer evaluation: threshold filtering and already-notified dedup

use crate::client::Deal;
use crate::config::Thresholds;
use rust_decimal::Decimal;
use std::collections::HashSet;

/// A deal reduced to what the watcher cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub id: String,
    pub pay: Decimal,
    pub earn: Decimal,
}

impl Offer {
    fn from_deal(deal: &Deal) -> Self {
        Self {
            id: deal.user_order_id.clone(),
            pay: deal.amount_to_pay,
            earn: deal.cardholder_earnings,
        }
    }
}

/// Result of evaluating one fetched batch
#[derive(Debug)]
pub struct Evaluation {
    /// Offers to surface this cycle, in feed order
    pub fresh: Vec<Offer>,
    /// Updated notified-id set; the caller commits it once the notify step
    /// has succeeded
    pub notified: HashSet<String>,
}

/// Filter a deal batch against the thresholds and split it into offers not
/// yet surfaced and the ids considered notified going forward.
///
/// The returned set is the intersection of `notified` with the ids passing
/// the filters, plus the ids of `fresh`. Ids for offers that left the feed
/// are dropped, so an offer that disappears and later returns is surfaced
/// again.
pub fn evaluate(deals: &[Deal], thresholds: &Thresholds, notified: &HashSet<String>) -> Evaluation {
    let passing: Vec<Offer> = deals
        .iter()
        .map(Offer::from_deal)
        .filter(|offer| passes(offer, thresholds))
        .collect();

    // Trim first: only ids still present in the feed stay deduplicated.
    let mut retained: HashSet<String> = passing
        .iter()
        .filter(|offer| notified.contains(&offer.id))
        .map(|offer| offer.id.clone())
        .collect();

    let mut fresh = Vec::new();
    for offer in passing {
        if retained.insert(offer.id.clone()) {
            fresh.push(offer);
        }
    }

    Evaluation {
        fresh,
        notified: retained,
    }
}

fn passes(offer: &Offer, thresholds: &Thresholds) -> bool {
    // Zero-earn deals are dropped before any ratio math.
    if offer.earn.is_zero() {
        return false;
    }

    if offer.earn < thresholds.min_earn || offer.pay > thresholds.max_pay {
        return false;
    }

    // Nothing to pay: any qualifying earn is an acceptable ratio.
    if offer.pay.is_zero() {
        return true;
    }

    offer.earn / offer.pay >= thresholds.min_earn_per_pay
}
