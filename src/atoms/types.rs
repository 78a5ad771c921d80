// Dealwatch Atoms: core domain types shared across engine, sessions, and
// commands. One property record schema, all fields optional except the
// ones the match engine cannot operate without (spec.md §9 design note:
// avoid mirroring per-call dynamic shape checks from the source).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ClientId = String;
pub type CriteriaId = String;
pub type AgentId = String;
pub type MatchId = String;

// ── Client ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: ClientStatus,
    pub created_at: DateTime<Utc>,
}

// ── Criteria ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DealQuality {
    Hot,
    Good,
    Fair,
}

impl DealQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealQuality::Hot => "HOT",
            DealQuality::Good => "GOOD",
            DealQuality::Fair => "FAIR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOT" => Some(DealQuality::Hot),
            "GOOD" => Some(DealQuality::Good),
            "FAIR" => Some(DealQuality::Fair),
            _ => None,
        }
    }
}

pub const DEFAULT_MIN_SCORE: u8 = 70;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criteria {
    pub id: CriteriaId,
    pub locations: Vec<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub bedrooms_min: Option<f64>,
    pub bathrooms_min: Option<f64>,
    pub property_types: Vec<String>,
    pub deal_quality: Vec<DealQuality>,
    pub min_score: u8,
    pub investment_type: Option<String>,
}

impl Criteria {
    /// Validate the structural invariants from §3/§8. Does not require a
    /// corpus or database access.
    pub fn validate(&self) -> Result<(), String> {
        if self.locations.is_empty() {
            return Err("locations must not be empty".into());
        }
        for loc in &self.locations {
            if loc.is_empty() || !loc.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("location {loc:?} is not a digit postal code"));
            }
        }
        if let (Some(min), Some(max)) = (self.price_min, self.price_max) {
            if min > max {
                return Err(format!("price_min ({min}) > price_max ({max})"));
            }
        }
        if let Some(min) = self.price_min {
            if min < 0 {
                return Err("price_min must be non-negative".into());
            }
        }
        if let Some(max) = self.price_max {
            if max < 0 {
                return Err("price_max must be non-negative".into());
            }
        }
        if let Some(b) = self.bedrooms_min {
            if b < 0.0 {
                return Err("bedrooms_min must be non-negative".into());
            }
        }
        if let Some(b) = self.bathrooms_min {
            if b < 0.0 {
                return Err("bathrooms_min must be non-negative".into());
            }
        }
        if self.min_score > 100 {
            return Err("min_score must be in [0,100]".into());
        }
        Ok(())
    }
}

// ── Agent ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Cancelled | AgentStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Cancelled => "cancelled",
            AgentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentStatus::Active),
            "paused" => Some(AgentStatus::Paused),
            "cancelled" => Some(AgentStatus::Cancelled),
            "completed" => Some(AgentStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NotificationPrefs {
    pub email: bool,
    pub sms: bool,
    pub chat: bool,
}

/// Sticky degraded-health flag surfaced over the read API (§4.4, §7).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentHealth {
    pub degraded: bool,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub client_id: ClientId,
    pub criteria_id: CriteriaId,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub check_count: u64,
    pub match_count: u64,
    pub notify: NotificationPrefs,
    pub health: AgentHealth,
}

// ── Match ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    New,
    Sent,
    Viewed,
    Contacted,
    Closed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::New => "new",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Viewed => "viewed",
            DeliveryStatus::Contacted => "contacted",
            DeliveryStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(DeliveryStatus::New),
            "sent" => Some(DeliveryStatus::Sent),
            "viewed" => Some(DeliveryStatus::Viewed),
            "contacted" => Some(DeliveryStatus::Contacted),
            "closed" => Some(DeliveryStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub agent_id: AgentId,
    pub property_key: String,
    pub match_score: u8,
    pub reasons: Vec<String>,
    pub property_snapshot: Property,
    pub matched_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
}

// ── Property / Corpus ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    Active,
    Pending,
    Sold,
}

impl PropertyStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(PropertyStatus::Active),
            "pending" => Some(PropertyStatus::Pending),
            "sold" => Some(PropertyStatus::Sold),
            _ => None,
        }
    }
}

/// Owner-intelligence block merged in from the enrichment feed (§4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentBlock {
    pub owner_name: Option<String>,
    pub mailing_street: Option<String>,
    pub mailing_city: Option<String>,
    pub mailing_postal_code: Option<String>,
    pub previous_owners: Vec<String>,
    pub absentee_owner: bool,
    pub investor_owned: bool,
    pub flip_history: bool,
    pub motivated_seller: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub street_address: String,
    pub city: Option<String>,
    pub postal_code: String,
    pub list_price: Option<i64>,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i64>,
    pub days_on_market: Option<i64>,
    pub property_type: Option<String>,
    pub status: PropertyStatus,
    pub deal_quality: Option<DealQuality>,
    pub opportunity_score: Option<u8>,
    pub enrichment: Option<EnrichmentBlock>,
}

impl Property {
    /// Canonical dedup key: normalized street address + postal code (§4.3).
    pub fn property_key(&self) -> String {
        format!("{}|{}", normalize(&self.street_address), self.postal_code)
    }
}

/// Upper-case, collapse whitespace runs, strip non-alphanumerics.
pub fn normalize(s: &str) -> String {
    let upper = s.to_ascii_uppercase();
    let mut out = String::with_capacity(upper.len());
    let mut last_was_space = false;
    for c in upper.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        }
        // other punctuation is simply dropped
    }
    out.trim_end().to_string()
}

/// Immutable set of properties, current at a point in time (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub properties: Vec<Property>,
    pub taken_at: DateTime<Utc>,
}

// ── Match engine outputs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMatchOutcome {
    pub property_key: String,
    pub score: u8,
    pub reasons: Vec<String>,
    pub property: Property,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceDropOutcome {
    pub property_key: String,
    pub old_price: i64,
    pub new_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MatchEvent {
    New(NewMatchOutcome),
    PriceDrop(PriceDropOutcome),
}
