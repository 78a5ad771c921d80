// Dealwatch Engine: Criteria Extractor — the conversational setup
// endpoint's collaborator (§6.1 `POST /api/agents/converse`, §9 DESIGN
// NOTES "LLM-integrated endpoints").
//
// The endpoint's contract is a plain value, `{message, agent_configured,
// suggested_criteria?}`, with no hidden side effects — agent creation
// stays a separate, validated `POST /api/agents` call. A real LLM-backed
// implementation can satisfy this trait; the default below does keyword
// and number extraction so the endpoint is exercisable without external
// credentials. This mirrors the corpus's pluggable provider-trait seam
// (`AnyProvider`/`AiProvider`), retargeted at extraction instead of chat
// completion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::atoms::types::DealQuality;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestedCriteria {
    pub locations: Vec<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub bedrooms_min: Option<f64>,
    pub bathrooms_min: Option<f64>,
    pub property_types: Vec<String>,
    pub deal_quality: Vec<DealQuality>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationReply {
    pub message: String,
    pub agent_configured: bool,
    pub suggested_criteria: Option<SuggestedCriteria>,
}

#[async_trait]
pub trait CriteriaExtractor: Send + Sync {
    async fn reply(&self, message: &str) -> ConversationReply;
}

/// Keyword/number extraction, no network call, no side effects.
/// `agent_configured` is always `false` — agent creation is a separate,
/// validated call.
pub struct HeuristicCriteriaExtractor;

#[async_trait]
impl CriteriaExtractor for HeuristicCriteriaExtractor {
    async fn reply(&self, message: &str) -> ConversationReply {
        let suggestion = extract(message);
        ConversationReply {
            message: format!("Here's what I picked up from that: {}", summarize(&suggestion)),
            agent_configured: false,
            suggested_criteria: Some(suggestion),
        }
    }
}

fn extract(message: &str) -> SuggestedCriteria {
    let lower = message.to_ascii_lowercase();
    let mut out = SuggestedCriteria::default();

    for token in message.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.len() == 5 && token.chars().all(|c| c.is_ascii_digit()) {
            out.locations.push(token.to_string());
        }
    }

    out.price_max = find_price(&lower, &["under", "below", "max", "no more than"]);
    out.price_min = find_price(&lower, &["over", "above", "min", "at least"]);

    out.bedrooms_min = find_count(&lower, &["bed", "br"]);
    out.bathrooms_min = find_count(&lower, &["bath", "ba"]);

    for (keyword, tag) in [
        ("single family", "single_family"),
        ("single-family", "single_family"),
        ("condo", "condo"),
        ("townhouse", "townhouse"),
        ("multi-family", "multi_family"),
        ("multifamily", "multi_family"),
        ("duplex", "multi_family"),
        ("land", "land"),
    ] {
        if lower.contains(keyword) && !out.property_types.iter().any(|t| t == tag) {
            out.property_types.push(tag.to_string());
        }
    }

    let upper = message.to_ascii_uppercase();
    for quality in [DealQuality::Hot, DealQuality::Good, DealQuality::Fair] {
        if upper.contains(quality.as_str()) {
            out.deal_quality.push(quality);
        }
    }

    out
}

fn find_price(lower: &str, keywords: &[&str]) -> Option<i64> {
    for keyword in keywords {
        if let Some(pos) = lower.find(keyword) {
            if let Some(value) = next_number(&lower[pos + keyword.len()..]) {
                return Some(value);
            }
        }
    }
    None
}

fn find_count(lower: &str, keywords: &[&str]) -> Option<f64> {
    for keyword in keywords {
        if let Some(pos) = lower.find(keyword) {
            let head = &lower[..pos];
            if let Some(token) = head.split_whitespace().last() {
                if let Ok(value) = token.trim_end_matches('+').parse::<f64>() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Parses the first number in `s`, honoring a trailing `k`/`m` multiplier
/// and ignoring leading currency punctuation (`$`, `,`, whitespace).
fn next_number(s: &str) -> Option<i64> {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() && (chars[i] == '$' || chars[i] == ',' || chars[i].is_whitespace()) {
        i += 1;
    }
    let start = i;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
    }
    if i == start {
        return None;
    }
    let digits: String = chars[start..i].iter().collect();
    let base: f64 = digits.parse().ok()?;
    let rest: String = chars[i..].iter().collect();
    let rest = rest.trim_start();
    let multiplier = if rest.starts_with('k') {
        1_000.0
    } else if rest.starts_with('m') {
        1_000_000.0
    } else {
        1.0
    };
    Some((base * multiplier).round() as i64)
}

fn summarize(s: &SuggestedCriteria) -> String {
    let mut parts = Vec::new();
    if !s.locations.is_empty() {
        parts.push(format!("locations {}", s.locations.join(", ")));
    }
    if let Some(min) = s.price_min {
        parts.push(format!("price from {min}"));
    }
    if let Some(max) = s.price_max {
        parts.push(format!("price up to {max}"));
    }
    if let Some(b) = s.bedrooms_min {
        parts.push(format!("{b}+ bedrooms"));
    }
    if let Some(b) = s.bathrooms_min {
        parts.push(format!("{b}+ bathrooms"));
    }
    if !s.property_types.is_empty() {
        parts.push(format!("types {}", s.property_types.join(", ")));
    }
    if !s.deal_quality.is_empty() {
        parts.push(format!(
            "deal quality {}",
            s.deal_quality.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }
    if parts.is_empty() {
        "nothing concrete yet — tell me a zip code, budget, or bed/bath minimums".to_string()
    } else {
        parts.join("; ")
    }
}
