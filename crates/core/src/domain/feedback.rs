use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::card::CardId;
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRating {
    Helpful,
    NotHelpful,
}

impl FeedbackRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::NotHelpful => "not_helpful",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "helpful" => Some(Self::Helpful),
            "not_helpful" => Some(Self::NotHelpful),
            _ => None,
        }
    }
}

/// At most one live rating per card. The first rating is sticky: later
/// submissions may only replace the comment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFeedback {
    pub card_id: CardId,
    pub tenant_id: TenantId,
    pub action_type: String,
    pub rating: FeedbackRating,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStats {
    pub total: u64,
    pub helpful: u64,
    pub not_helpful: u64,
    pub helpful_rate: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: u64,
    pub helpful: u64,
    pub not_helpful: u64,
    pub helpful_rate: u32,
    /// Only action types with at least one rating appear here.
    pub by_type: BTreeMap<String, TypeStats>,
}

/// Whole-percent helpful rate; zero ratings yields zero rather than a
/// division error.
pub fn helpful_rate(helpful: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((helpful as f64 / total as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::{helpful_rate, FeedbackRating};

    #[test]
    fn rating_round_trips_from_storage_encoding() {
        for rating in [FeedbackRating::Helpful, FeedbackRating::NotHelpful] {
            assert_eq!(FeedbackRating::parse(rating.as_str()), Some(rating));
        }
        assert_eq!(FeedbackRating::parse("meh"), None);
    }

    #[test]
    fn helpful_rate_rounds_to_whole_percent() {
        assert_eq!(helpful_rate(0, 0), 0);
        assert_eq!(helpful_rate(1, 3), 33);
        assert_eq!(helpful_rate(2, 3), 67);
        assert_eq!(helpful_rate(3, 3), 100);
    }
}
