//! Routing decision table and membership planning.
//!
//! Both functions here are pure: the engine feeds them snapshots and
//! performs whatever write they ask for.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{AttachmentCount, ClassificationOutcome, Destination};

/// Maps a classified item to its holding area.
///
/// Total over every input. Untagged items always go to the inbox, tagged
/// items without a document wait in the missing-attachment area, and every
/// outcome without a dedicated area (including `Unclassifiable`) falls back
/// to the inbox.
#[must_use]
pub const fn route(
    tag_present: bool,
    count: AttachmentCount,
    outcome: ClassificationOutcome,
) -> Destination {
    use ClassificationOutcome as O;

    if !tag_present {
        return Destination::Inbox;
    }
    match (count, outcome) {
        (AttachmentCount::Zero, _) | (_, O::NoAttachment) => Destination::MissingAttachmentHolding,
        (_, O::Review) => Destination::ReviewHolding,
        (_, O::MultiAttachmentDuplicate) => Destination::DuplicateHolding,
        (_, O::MultiAttachmentNoDuplicate) => Destination::MultiAttachmentHolding,
        (_, O::NoAnalysisTag | O::SupportingInformation | O::MainPaper | O::Unclassifiable) => {
            Destination::Inbox
        }
    }
}

/// Collection keys of the router destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationMap {
    /// Default inbox.
    pub inbox: String,
    /// Review articles.
    pub review: String,
    /// Duplicates.
    pub duplicates: String,
    /// Several distinct documents.
    pub multi_attachment: String,
    /// Tagged items without a document.
    pub missing_attachment: String,
}

impl DestinationMap {
    /// Collection key of `destination`.
    #[must_use]
    pub fn key(&self, destination: Destination) -> &str {
        match destination {
            Destination::Inbox => &self.inbox,
            Destination::ReviewHolding => &self.review,
            Destination::DuplicateHolding => &self.duplicates,
            Destination::MultiAttachmentHolding => &self.multi_attachment,
            Destination::MissingAttachmentHolding => &self.missing_attachment,
        }
    }

    /// Every destination collection key.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        Destination::ALL.into_iter().map(|d| self.key(d))
    }
}

/// What to do with an item's collection membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipPlan {
    /// Replace the membership with this set.
    Move(BTreeSet<String>),
    /// Membership already matches; no write.
    Stay,
}

/// Plans the membership change that puts an item into `target` only.
///
/// Every collection in `managed` (workflow sources and destinations) is
/// removed, `target` is added, and collections outside `managed` are left
/// alone. An unchanged set yields [`MembershipPlan::Stay`], so re-applying
/// a plan is a no-op.
#[must_use]
pub fn plan_membership<'a, I>(current: &BTreeSet<String>, managed: I, target: &str) -> MembershipPlan
where
    I: IntoIterator<Item = &'a str>,
{
    let managed: BTreeSet<&str> = managed.into_iter().collect();
    let mut next: BTreeSet<String> = current
        .iter()
        .filter(|c| !managed.contains(c.as_str()))
        .cloned()
        .collect();
    next.insert(target.to_string());

    if &next == current {
        MembershipPlan::Stay
    } else {
        MembershipPlan::Move(next)
    }
}
