use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ElectionError;
use crate::ledger::{AccountId, Amount};

/// Every campaign runs with exactly this many candidates.
pub const CANDIDATE_COUNT: usize = 3;

/// 1-based position of a candidate on a campaign slate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CandidateIndex(u8);

impl CandidateIndex {
    pub const FIRST: CandidateIndex = CandidateIndex(1);

    pub fn new(index: u32) -> Result<Self, ElectionError> {
        if (1..=CANDIDATE_COUNT as u32).contains(&index) {
            Ok(CandidateIndex(index as u8))
        } else {
            Err(ElectionError::InvalidCandidate { index })
        }
    }

    pub fn get(self) -> u32 {
        u32::from(self.0)
    }

    fn slot(self) -> usize {
        usize::from(self.0 - 1)
    }

    fn from_slot(slot: usize) -> Self {
        CandidateIndex(slot as u8 + 1)
    }
}

impl TryFrom<u32> for CandidateIndex {
    type Error = ElectionError;

    fn try_from(index: u32) -> Result<Self, Self::Error> {
        CandidateIndex::new(index)
    }
}

impl From<CandidateIndex> for u32 {
    fn from(index: CandidateIndex) -> u32 {
        index.get()
    }
}

impl fmt::Display for CandidateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live election: fixed slate, fixed window, running tally and pool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Campaign {
    pub name: String,
    pub candidates: [AccountId; CANDIDATE_COUNT],
    pub created_at: u64,
    pub finish_at: u64,
    vote_counts: [u64; CANDIDATE_COUNT],
    pool: Amount,
    voters: BTreeSet<AccountId>,
}

impl Campaign {
    pub fn new(
        name: String,
        candidates: [AccountId; CANDIDATE_COUNT],
        now: u64,
        duration_secs: u64,
    ) -> Self {
        Self {
            name,
            candidates,
            created_at: now,
            finish_at: now.saturating_add(duration_secs),
            vote_counts: [0; CANDIDATE_COUNT],
            pool: 0,
            voters: BTreeSet::new(),
        }
    }

    /// Votes are accepted in `[created_at, finish_at)`.
    pub fn is_open(&self, now: u64) -> bool {
        now < self.finish_at
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.voters.contains(voter)
    }

    pub fn candidate(&self, index: CandidateIndex) -> &AccountId {
        &self.candidates[index.slot()]
    }

    pub fn votes_for(&self, index: CandidateIndex) -> u64 {
        self.vote_counts[index.slot()]
    }

    pub fn tally(&self) -> [u64; CANDIDATE_COUNT] {
        self.vote_counts
    }

    pub fn total_votes(&self) -> u64 {
        self.vote_counts.iter().sum()
    }

    pub fn pool(&self) -> Amount {
        self.pool
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    /// Candidate with the most votes; ties go to the lowest index.
    pub fn winner(&self) -> CandidateIndex {
        let mut best = 0;
        for slot in 1..CANDIDATE_COUNT {
            if self.vote_counts[slot] > self.vote_counts[best] {
                best = slot;
            }
        }
        CandidateIndex::from_slot(best)
    }

    pub(crate) fn record_vote(&mut self, voter: AccountId, index: CandidateIndex, pooled: Amount) {
        self.vote_counts[index.slot()] += 1;
        self.voters.insert(voter);
        self.pool += pooled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign_with(counts: [u64; CANDIDATE_COUNT]) -> Campaign {
        let mut campaign = Campaign::new(
            "GD2021".into(),
            ["a".into(), "b".into(), "c".into()],
            100,
            10,
        );
        campaign.vote_counts = counts;
        campaign
    }

    #[test]
    fn candidate_index_accepts_only_one_to_three() {
        assert!(CandidateIndex::new(0).is_err());
        assert!(CandidateIndex::new(4).is_err());
        assert_eq!(CandidateIndex::new(3).unwrap().get(), 3);
        assert_eq!(CandidateIndex::FIRST, CandidateIndex::new(1).unwrap());
    }

    #[test]
    fn candidate_index_deserialization_is_validated() {
        let ok: CandidateIndex = serde_json::from_str("2").unwrap();
        assert_eq!(ok.get(), 2);
        assert!(serde_json::from_str::<CandidateIndex>("4").is_err());
    }

    #[test]
    fn winner_prefers_lowest_index_among_maxima() {
        assert_eq!(campaign_with([1, 1, 1]).winner().get(), 1);
        assert_eq!(campaign_with([1, 2, 2]).winner().get(), 2);
        assert_eq!(campaign_with([0, 0, 0]).winner().get(), 1);
        assert_eq!(campaign_with([1, 0, 2]).winner().get(), 3);
        assert_eq!(campaign_with([2, 0, 2]).winner().get(), 1);
    }

    #[test]
    fn window_is_half_open() {
        let campaign = campaign_with([0, 0, 0]);
        assert_eq!(campaign.finish_at, 110);
        assert!(campaign.is_open(109));
        assert!(!campaign.is_open(110));
    }

    #[test]
    fn record_vote_updates_tally_pool_and_voters() {
        let mut campaign = campaign_with([0, 0, 0]);
        let second = CandidateIndex::new(2).unwrap();
        campaign.record_vote("v1".into(), second, 9);
        campaign.record_vote("v2".into(), second, 9);
        assert_eq!(campaign.votes_for(second), 2);
        assert_eq!(campaign.total_votes(), 2);
        assert_eq!(campaign.pool(), 18);
        assert!(campaign.has_voted("v1"));
        assert!(!campaign.has_voted("v3"));
        assert_eq!(campaign.candidate(second), "b");
    }
}
