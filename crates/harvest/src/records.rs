//! Typed records flowing through a harvest run
//!
//! Upstream payloads are decoded into these types at the collaborator
//! boundary; the orchestrator never sees raw JSON.

use std::collections::BTreeMap;

/// One holder row of a token's holder list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    /// Wallet that owns the token account. This is the secondary lookup key.
    pub owner: String,
    pub token_account: String,
    /// Raw amount in base units.
    pub amount: u64,
    pub decimals: u8,
    pub rank: Option<u32>,
}

impl Holder {
    /// Amount scaled by `decimals`.
    pub fn ui_amount(&self) -> f64 {
        self.amount as f64 / 10f64.powi(i32::from(self.decimals))
    }
}

/// Which optional fields a decoder had to fill with defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Completeness {
    #[default]
    Complete,
    Degraded { missing: Vec<&'static str> },
}

impl Completeness {
    /// `Complete` when nothing is missing.
    pub fn from_missing(missing: Vec<&'static str>) -> Self {
        if missing.is_empty() {
            Completeness::Complete
        } else {
            Completeness::Degraded { missing }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Author {
    pub handle: String,
    pub display_name: String,
    pub followers: u64,
    pub can_dm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub created_at: Option<String>,
    pub author: Author,
    pub completeness: Completeness,
}

/// Posts returned by one secondary lookup, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResult {
    pub posts: Vec<Post>,
}

/// What an accepted holder contributes to the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub handle: String,
    pub post_text: String,
    pub can_dm: bool,
    pub followers: u64,
}

impl Enrichment {
    pub fn from_post(post: &Post) -> Self {
        Self {
            handle: post.author.handle.clone(),
            post_text: post.text.clone(),
            can_dm: post.author.can_dm,
            followers: post.author.followers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// No proxy or identity was available for the lookup.
    ResourcesExhausted,
    /// Lookup request failed.
    LookupFailed,
    /// Lookup succeeded but found nothing.
    NoPosts,
    /// Posts exist but none passed the classifier.
    NoMatchingPost,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::ResourcesExhausted => "resources_exhausted",
            RejectReason::LookupFailed => "lookup_failed",
            RejectReason::NoPosts => "no_posts",
            RejectReason::NoMatchingPost => "no_matching_post",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accepted(Enrichment),
    Rejected(RejectReason),
}

/// Asset symbol → USD value.
pub type Valuation = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRecord {
    pub contract: String,
    pub address: String,
    pub enrichment: Enrichment,
    pub valuation: Valuation,
}

impl AcceptedRecord {
    pub fn usd_total(&self) -> f64 {
        self.valuation.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub contract: String,
    pub address: String,
    pub reason: RejectReason,
}
