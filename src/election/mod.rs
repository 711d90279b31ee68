//! Campaign lifecycle state machine.
//!
//! [`ElectionLedger`] owns every live campaign, the owner identity and the
//! commission pool. Each mutating operation takes a [`Call`] carrying the
//! caller identity, the current time and the attached value, validates all
//! preconditions first and only then writes, so a rejected call never leaves
//! partial state behind. Value movements are returned to the caller as
//! [`LedgerMutation`]s for the host environment to apply.

mod campaign;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ElectionConfig;
use crate::ledger::{AccountId, Amount, LedgerMutation};

pub use campaign::{Campaign, CandidateIndex, CANDIDATE_COUNT};

pub type CampaignId = String;

/// Stable classification of [`ElectionError`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    NotFound,
    Conflict,
    Validation,
    Timing,
    State,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ElectionError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("campaign {name:?} doesn't exist")]
    CampaignNotFound { name: String },
    #[error("campaign {name:?} already exists")]
    CampaignAlreadyExists { name: String },
    #[error("{voter} has already voted in {campaign:?}")]
    AlreadyVoted { campaign: String, voter: AccountId },
    #[error("candidate {index} doesn't exist")]
    InvalidCandidate { index: u32 },
    #[error("vote price must be exactly {expected}, got {attached}")]
    InvalidVotePrice { expected: Amount, attached: Amount },
    #[error("operation does not accept value, got {attached}")]
    ValueNotAccepted { attached: Amount },
    #[error("candidate {candidate} appears more than once on the slate")]
    DuplicateCandidate { candidate: AccountId },
    #[error("campaign name must not be empty")]
    InvalidCampaignName,
    #[error("election {name:?} is over since {finish_at}")]
    ElectionOver { name: String, finish_at: u64 },
    #[error("campaign {name:?} runs until {finish_at}")]
    TooEarly { name: String, finish_at: u64 },
    #[error("current commission balance is empty")]
    CommissionEmpty,
}

impl ElectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ElectionError::PermissionDenied => ErrorKind::Authorization,
            ElectionError::CampaignNotFound { .. } => ErrorKind::NotFound,
            ElectionError::CampaignAlreadyExists { .. } | ElectionError::AlreadyVoted { .. } => {
                ErrorKind::Conflict
            }
            ElectionError::InvalidCandidate { .. }
            | ElectionError::InvalidVotePrice { .. }
            | ElectionError::ValueNotAccepted { .. }
            | ElectionError::DuplicateCandidate { .. }
            | ElectionError::InvalidCampaignName => ErrorKind::Validation,
            ElectionError::ElectionOver { .. } | ElectionError::TooEarly { .. } => {
                ErrorKind::Timing
            }
            ElectionError::CommissionEmpty => ErrorKind::State,
        }
    }
}

/// Execution context of one state transition, supplied by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub caller: AccountId,
    pub now: u64,
    pub value: Amount,
}

impl Call {
    pub fn new(caller: impl Into<AccountId>, now: u64) -> Self {
        Self {
            caller: caller.into(),
            now,
            value: 0,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }

    fn reject_value(&self) -> Result<(), ElectionError> {
        if self.value != 0 {
            return Err(ElectionError::ValueNotAccepted {
                attached: self.value,
            });
        }
        Ok(())
    }
}

/// Outcome of a transition that moves value in the host environment.
pub trait Transfers {
    fn mutations(&self) -> Vec<LedgerMutation>;
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Ballot {
    pub campaign: CampaignId,
    pub voter: AccountId,
    pub candidate: CandidateIndex,
    pub value: Amount,
    pub commission: Amount,
    pub pooled: Amount,
}

impl Transfers for Ballot {
    fn mutations(&self) -> Vec<LedgerMutation> {
        vec![LedgerMutation::Escrow {
            from: self.voter.clone(),
            amount: self.value,
            memo: Some(format!("vote:{}:{}", self.campaign, self.candidate)),
        }]
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Settlement {
    pub campaign: CampaignId,
    pub winner: CandidateIndex,
    pub recipient: AccountId,
    pub amount: Amount,
    pub tally: [u64; CANDIDATE_COUNT],
}

impl Transfers for Settlement {
    fn mutations(&self) -> Vec<LedgerMutation> {
        vec![LedgerMutation::Release {
            to: self.recipient.clone(),
            amount: self.amount,
            memo: Some(format!("settle:{}:{}", self.campaign, self.winner)),
        }]
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Withdrawal {
    pub to: AccountId,
    pub amount: Amount,
}

impl Transfers for Withdrawal {
    fn mutations(&self) -> Vec<LedgerMutation> {
        vec![LedgerMutation::Release {
            to: self.to.clone(),
            amount: self.amount,
            memo: Some("commission".into()),
        }]
    }
}

impl Transfers for CampaignId {
    fn mutations(&self) -> Vec<LedgerMutation> {
        Vec::new()
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CampaignInfo {
    pub finish_at: u64,
    pub total_votes: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElectionEvent {
    CampaignCreated {
        name: CampaignId,
        candidates: [AccountId; CANDIDATE_COUNT],
        finish_at: u64,
        at: u64,
    },
    VoteCast {
        name: CampaignId,
        voter: AccountId,
        candidate: CandidateIndex,
        commission: Amount,
        pooled: Amount,
        at: u64,
    },
    CampaignFinished {
        name: CampaignId,
        winner: CandidateIndex,
        recipient: AccountId,
        amount: Amount,
        tally: [u64; CANDIDATE_COUNT],
        at: u64,
    },
    CommissionWithdrawn {
        to: AccountId,
        amount: Amount,
        at: u64,
    },
}

/// Lifetime value flows, kept so conservation can be audited at any point.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Totals {
    pub received: Amount,
    pub settled: Amount,
    pub withdrawn: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElectionLedger {
    owner: AccountId,
    config: ElectionConfig,
    commission_pool: Amount,
    campaigns: BTreeMap<CampaignId, Campaign>,
    totals: Totals,
    events: Vec<ElectionEvent>,
}

impl ElectionLedger {
    pub fn new(owner: impl Into<AccountId>, config: ElectionConfig) -> Self {
        Self {
            owner: owner.into(),
            config,
            commission_pool: 0,
            campaigns: BTreeMap::new(),
            totals: Totals::default(),
            events: Vec::new(),
        }
    }

    pub fn owner(&self) -> &AccountId {
        &self.owner
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn events(&self) -> &[ElectionEvent] {
        &self.events
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Working copy for one transaction. The audit log is left behind and
    /// the copy starts with an empty one.
    pub(crate) fn stage(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            config: self.config,
            commission_pool: self.commission_pool,
            campaigns: self.campaigns.clone(),
            totals: self.totals.clone(),
            events: Vec::new(),
        }
    }

    /// Adopts a staged copy, appending the events it recorded.
    pub(crate) fn commit(&mut self, staged: Self) {
        let Self {
            owner,
            config,
            commission_pool,
            campaigns,
            totals,
            mut events,
        } = staged;
        self.owner = owner;
        self.config = config;
        self.commission_pool = commission_pool;
        self.campaigns = campaigns;
        self.totals = totals;
        self.events.append(&mut events);
    }

    fn require_owner(&self, call: &Call) -> Result<(), ElectionError> {
        if call.caller != self.owner {
            return Err(ElectionError::PermissionDenied);
        }
        Ok(())
    }

    pub fn campaign(&self, name: &str) -> Result<&Campaign, ElectionError> {
        self.campaigns
            .get(name)
            .ok_or_else(|| ElectionError::CampaignNotFound {
                name: name.to_string(),
            })
    }

    pub fn campaign_names(&self) -> Vec<CampaignId> {
        self.campaigns.keys().cloned().collect()
    }

    pub fn create_campaign(
        &mut self,
        call: &Call,
        name: &str,
        candidates: [AccountId; CANDIDATE_COUNT],
    ) -> Result<CampaignId, ElectionError> {
        self.require_owner(call)?;
        call.reject_value()?;
        if name.trim().is_empty() {
            return Err(ElectionError::InvalidCampaignName);
        }
        for (pos, candidate) in candidates.iter().enumerate() {
            if candidates[..pos].contains(candidate) {
                return Err(ElectionError::DuplicateCandidate {
                    candidate: candidate.clone(),
                });
            }
        }
        if self.campaigns.contains_key(name) {
            return Err(ElectionError::CampaignAlreadyExists {
                name: name.to_string(),
            });
        }

        let campaign = Campaign::new(
            name.to_string(),
            candidates,
            call.now,
            self.config.campaign_duration_secs,
        );
        info!(campaign = name, finish_at = campaign.finish_at, "campaign created");
        self.events.push(ElectionEvent::CampaignCreated {
            name: name.to_string(),
            candidates: campaign.candidates.clone(),
            finish_at: campaign.finish_at,
            at: call.now,
        });
        self.campaigns.insert(name.to_string(), campaign);
        Ok(name.to_string())
    }

    pub fn vote(&mut self, call: &Call, name: &str, candidate: u32) -> Result<Ballot, ElectionError> {
        let price = self.config.vote_price;
        let campaign = self
            .campaigns
            .get_mut(name)
            .ok_or_else(|| ElectionError::CampaignNotFound {
                name: name.to_string(),
            })?;
        if !campaign.is_open(call.now) {
            return Err(ElectionError::ElectionOver {
                name: name.to_string(),
                finish_at: campaign.finish_at,
            });
        }
        let index = CandidateIndex::new(candidate)?;
        if campaign.has_voted(&call.caller) {
            debug!(campaign = name, voter = %call.caller, "repeat vote rejected");
            return Err(ElectionError::AlreadyVoted {
                campaign: name.to_string(),
                voter: call.caller.clone(),
            });
        }
        if call.value != price {
            return Err(ElectionError::InvalidVotePrice {
                expected: price,
                attached: call.value,
            });
        }

        let (commission, pooled) = self.config.split(call.value);
        campaign.record_vote(call.caller.clone(), index, pooled);
        self.commission_pool += commission;
        self.totals.received += call.value;
        info!(campaign = name, candidate = %index, voter = %call.caller, "vote cast");
        self.events.push(ElectionEvent::VoteCast {
            name: name.to_string(),
            voter: call.caller.clone(),
            candidate: index,
            commission,
            pooled,
            at: call.now,
        });
        Ok(Ballot {
            campaign: name.to_string(),
            voter: call.caller.clone(),
            candidate: index,
            value: call.value,
            commission,
            pooled,
        })
    }

    pub fn finish_campaign(&mut self, call: &Call, name: &str) -> Result<Settlement, ElectionError> {
        call.reject_value()?;
        let campaign = self.campaign(name)?;
        if call.now < campaign.finish_at {
            return Err(ElectionError::TooEarly {
                name: name.to_string(),
                finish_at: campaign.finish_at,
            });
        }

        let Some(campaign) = self.campaigns.remove(name) else {
            return Err(ElectionError::CampaignNotFound {
                name: name.to_string(),
            });
        };
        let winner = campaign.winner();
        let settlement = Settlement {
            campaign: name.to_string(),
            winner,
            recipient: campaign.candidate(winner).clone(),
            amount: campaign.pool(),
            tally: campaign.tally(),
        };
        self.totals.settled += settlement.amount;
        info!(
            campaign = name,
            winner = %winner,
            amount = %settlement.amount,
            "campaign finished"
        );
        self.events.push(ElectionEvent::CampaignFinished {
            name: name.to_string(),
            winner,
            recipient: settlement.recipient.clone(),
            amount: settlement.amount,
            tally: settlement.tally,
            at: call.now,
        });
        Ok(settlement)
    }

    pub fn withdraw_commission(&mut self, call: &Call) -> Result<Withdrawal, ElectionError> {
        self.require_owner(call)?;
        call.reject_value()?;
        if self.commission_pool == 0 {
            return Err(ElectionError::CommissionEmpty);
        }

        let amount = std::mem::take(&mut self.commission_pool);
        self.totals.withdrawn += amount;
        info!(amount = %amount, "commission withdrawn");
        self.events.push(ElectionEvent::CommissionWithdrawn {
            to: self.owner.clone(),
            amount,
            at: call.now,
        });
        Ok(Withdrawal {
            to: self.owner.clone(),
            amount,
        })
    }

    pub fn candidates(&self, name: &str) -> Result<&[AccountId; CANDIDATE_COUNT], ElectionError> {
        Ok(&self.campaign(name)?.candidates)
    }

    pub fn info(&self, name: &str) -> Result<CampaignInfo, ElectionError> {
        let campaign = self.campaign(name)?;
        Ok(CampaignInfo {
            finish_at: campaign.finish_at,
            total_votes: campaign.total_votes(),
        })
    }

    pub fn candidate_votes(&self, name: &str, candidate: u32) -> Result<u64, ElectionError> {
        let campaign = self.campaign(name)?;
        Ok(campaign.votes_for(CandidateIndex::new(candidate)?))
    }

    pub fn campaign_balance(&self, name: &str) -> Result<Amount, ElectionError> {
        Ok(self.campaign(name)?.pool())
    }

    pub fn commission_balance(&self) -> Amount {
        self.commission_pool
    }

    /// Sum of the pools of every live campaign.
    pub fn live_pools(&self) -> Amount {
        self.campaigns.values().map(Campaign::pool).sum()
    }

    /// Value held on behalf of the ledger: commission plus live pools.
    pub fn escrowed(&self) -> Amount {
        self.commission_pool + self.live_pools()
    }

    /// Every unit ever received is either paid out, withdrawn or still held.
    pub fn is_conserved(&self) -> bool {
        self.totals.received == self.totals.settled + self.totals.withdrawn + self.escrowed()
    }
}
