//! Eligibility: a post that publishes a Solana address without warning language

use harvest::{Classification, EligibilityClassifier, Enrichment, RejectReason, SearchResult};
use regex::Regex;

/// Phrases that mark a post as a warning or a question about someone else's
/// wallet rather than the author's own.
const BLACKLIST: &[&str] = &[
    r"know\b",
    r"this\s+wallet",
    r"dis\s+wallet",
    r"who\s+dis",
    r"who\s+this",
    r"scammer\b",
    r"hacked\b",
    r"bot\b",
    r"spam\b",
    r"fake\b",
    r"report\b",
    r"blocked\b",
    r"suspicious\b",
    r"beware\b",
    r"warning\b",
    r"scam\b",
    r"hack\b",
];

const BASE58: &str = "[1-9A-HJ-NP-Za-km-z]";

pub struct AddressMentionClassifier {
    blacklist: Regex,
    address: Regex,
}

impl AddressMentionClassifier {
    pub fn new() -> crate::Result<Self> {
        let blacklist = Regex::new(&BLACKLIST.join("|"))?;
        let forms = [
            format!("{BASE58}{{32,44}}"),
            format!("sol:{BASE58}{{32,44}}"),
            format!(r"solscan\.io/account/{BASE58}{{32,44}}"),
            format!(r"explorer\.solana\.com/address/{BASE58}{{32,44}}"),
        ];
        let alternatives: Vec<String> = forms.iter().map(|form| format!("(?:{form})")).collect();
        let address = Regex::new(&format!(r"(?i)\b({})\b", alternatives.join("|")))?;
        Ok(Self { blacklist, address })
    }

    /// True when `text` carries an address and none of the blacklisted phrases.
    pub fn is_eligible(&self, text: &str) -> bool {
        !self.blacklist.is_match(&text.to_lowercase()) && self.address.is_match(text)
    }
}

impl EligibilityClassifier for AddressMentionClassifier {
    fn classify(&self, result: &SearchResult) -> Classification {
        match result.posts.iter().find(|post| self.is_eligible(&post.text)) {
            Some(post) => Classification::Accepted(Enrichment::from_post(post)),
            None => Classification::Rejected(RejectReason::NoMatchingPost),
        }
    }
}
