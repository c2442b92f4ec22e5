// 🏛️ Membership Blender - organization score from own activity + members
//
//   members[c] = Σ(member.score[c] * member.importance) / Σ member.importance
//   final[c]   = 0.10 * own[c] + 0.90 * members[c]
//
// An organization without members contributes 0 through the members term,
// so an organization with neither members nor own activities ends up at
// 0.10 * 5.0 = 0.5. That value is a low-information sentinel, not a rating.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::entities::{Category, CategoryScores};

/// Share of the organization's own activity aggregate
pub const OWN_ACTIVITY_SHARE: f64 = 0.10;

/// Share of the importance-weighted member average
pub const MEMBERSHIP_SHARE: f64 = 0.90;

// ============================================================================
// MEMBER INPUT
// ============================================================================

/// Stored scores of one active member
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberScore {
    pub individual_id: i64,
    pub importance_weight: f64,
    pub scores: CategoryScores,
}

// ============================================================================
// MEMBER ACCUMULATOR
// ============================================================================

#[derive(Debug, Clone, Default)]
struct MemberAccumulator {
    weighted_overall: f64,
    weighted_by_category: [f64; Category::COUNT],
    total_weight: f64,
    member_count: usize,
}

impl MemberAccumulator {
    fn add(&mut self, member: &MemberScore) {
        // NaN fails every comparison, so test for the valid range
        if !(member.importance_weight > 0.0 && member.importance_weight.is_finite()) {
            warn!(
                individual_id = member.individual_id,
                importance = member.importance_weight,
                "Importance weight is not a positive number, member ignored"
            );
            return;
        }
        let w = member.importance_weight;
        self.weighted_overall += member.scores.overall * w;
        for (slot, score) in self.weighted_by_category.iter_mut().zip(member.scores.by_category) {
            *slot += score * w;
        }
        self.total_weight += w;
        self.member_count += 1;
    }

    fn average(&self) -> Option<CategoryScores> {
        if self.total_weight <= 0.0 {
            return None;
        }
        Some(CategoryScores {
            overall: self.weighted_overall / self.total_weight,
            by_category: self.weighted_by_category.map(|v| v / self.total_weight),
        })
    }
}

// ============================================================================
// BLEND
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationBlend {
    /// Ballasted aggregate of the organization's own activities
    pub own: CategoryScores,

    /// Importance-weighted member average (None without scored members)
    pub members: Option<CategoryScores>,

    pub member_count: usize,

    /// Scores to store on the organization
    pub scores: CategoryScores,
}

impl OrganizationBlend {
    /// True when nothing but the ballast went into the result
    pub fn is_low_information(&self, own_activity_count: usize) -> bool {
        self.members.is_none() && own_activity_count == 0
    }
}

/// Importance-weighted average of member scores
pub fn members_score(members: &[MemberScore]) -> Option<CategoryScores> {
    accumulate(members).average()
}

fn accumulate(members: &[MemberScore]) -> MemberAccumulator {
    let mut accumulator = MemberAccumulator::default();
    for member in members {
        accumulator.add(member);
    }
    accumulator
}

fn finish(own: CategoryScores, accumulator: &MemberAccumulator) -> OrganizationBlend {
    let member_term = accumulator.average();
    OrganizationBlend {
        own,
        scores: blend_scores(&own, member_term.as_ref()),
        members: member_term,
        member_count: accumulator.member_count,
    }
}

/// 10/90 split between own aggregate and member average; a missing member term counts as 0
pub fn blend_scores(own: &CategoryScores, members: Option<&CategoryScores>) -> CategoryScores {
    let members = members.copied().unwrap_or_else(|| CategoryScores::uniform(0.0));
    own.zip_with(&members, |o, m| OWN_ACTIVITY_SHARE * o + MEMBERSHIP_SHARE * m)
}

/// Blend one organization
pub fn blend(own: CategoryScores, members: &[MemberScore]) -> OrganizationBlend {
    finish(own, &accumulate(members))
}

/// Blend a batch of organizations in one pass over their memberships
///
/// `memberships` holds (organization_id, member) pairs. Organizations missing
/// from `own_scores` are skipped.
pub fn blend_organizations(
    own_scores: &BTreeMap<i64, CategoryScores>,
    memberships: &[(i64, MemberScore)],
) -> BTreeMap<i64, OrganizationBlend> {
    let mut arena: HashMap<i64, MemberAccumulator> = own_scores
        .keys()
        .map(|id| (*id, MemberAccumulator::default()))
        .collect();

    for (organization_id, member) in memberships {
        if let Some(accumulator) = arena.get_mut(organization_id) {
            accumulator.add(member);
        }
    }

    let blends: BTreeMap<i64, OrganizationBlend> = own_scores
        .iter()
        .map(|(id, own)| {
            let accumulator = arena.remove(id).unwrap_or_default();
            (*id, finish(*own, &accumulator))
        })
        .collect();

    debug!(
        organizations = blends.len(),
        memberships = memberships.len(),
        "Blended organization scores"
    );

    blends
}
