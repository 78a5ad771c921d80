// Dealwatch Engine: Enrichment Pipeline (§4.2 / C2)
//
// Parses the auxiliary owner-intelligence feed (§6.3) and merges it into
// the current Corpus Store snapshot by canonical address key. Pure given
// its two inputs — no network I/O, no database access.

use std::collections::HashMap;

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{normalize, DealQuality, EnrichmentBlock, Property, PropertyStatus};

/// Case-insensitive tokens that mark an owner as a corporate/investment
/// entity (§4.2 step 2).
const INVESTOR_TOKENS: &[&str] = &[
    "LLC",
    "TRUST",
    "INC",
    "CORP",
    "LP",
    "VENTURES",
    "PROPERTIES",
    "HOLDINGS",
    "INVESTMENTS",
];

const REQUIRED_COLUMNS: &[&str] = &[
    "Street",
    "City",
    "State",
    "Zip",
    "Price",
    "Sq Ft",
    "Price/Sq Ft",
    "Beds",
    "Baths",
    "Lot Size",
    "Year Built",
    "Property Type",
    "Status",
    "Days on Market",
    "# of Units",
    "Owner 1 First Name",
    "Owner 1 Last Name",
    "Owner 1 Business Name",
    "Owner 2 First Name",
    "Owner 2 Last Name",
    "Owner Mailing Street",
    "Owner Mailing City",
    "Owner Mailing State",
    "Owner Mailing Zip",
    "Previous Owner 1",
    "Previous Owner 2",
];

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentReport {
    pub rows_read: usize,
    pub rows_merged: usize,
    pub rows_skipped: usize,
    pub skipped: Vec<SkippedRow>,
}

struct FeedRecord {
    property: Property,
    enrichment: EnrichmentBlock,
}

fn header_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn field<'a>(record: &'a csv::StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| record.get(i)).map(str::trim).filter(|s| !s.is_empty())
}

fn is_investor_token(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    INVESTOR_TOKENS.iter().any(|tok| upper.contains(tok))
}

/// Parse the CSV feed into per-row records plus a report of skipped rows.
/// Records missing `Zip` or a parseable street identifier are skipped.
pub fn parse_feed(bytes: &[u8]) -> EngineResult<(Vec<(Property, EnrichmentBlock)>, EnrichmentReport)> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = rdr.headers()?.clone();

    let idx: HashMap<&str, Option<usize>> = REQUIRED_COLUMNS
        .iter()
        .map(|name| (*name, header_index(&headers, name)))
        .collect();

    let mut report = EnrichmentReport::default();
    let mut records = Vec::new();

    for (row_num, result) in rdr.records().enumerate() {
        let row = result?;
        report.rows_read += 1;

        let street = field(&row, idx["Street"]);
        let zip = field(&row, idx["Zip"]);

        let (street, zip) = match (street, zip) {
            (Some(s), Some(z)) => (s, z),
            _ => {
                report.rows_skipped += 1;
                report.skipped.push(SkippedRow {
                    row: row_num,
                    reason: "missing Street or Zip".into(),
                });
                continue;
            }
        };

        let price = field(&row, idx["Price"]).and_then(|v| parse_money(v));
        let sqft = field(&row, idx["Sq Ft"]).and_then(|v| parse_int(v));
        let beds = field(&row, idx["Beds"]).and_then(|v| v.parse::<f64>().ok());
        let baths = field(&row, idx["Baths"]).and_then(|v| v.parse::<f64>().ok());
        let property_type = field(&row, idx["Property Type"]).map(|s| s.to_string());
        let status = field(&row, idx["Status"])
            .and_then(PropertyStatus::parse)
            .unwrap_or(PropertyStatus::Active);
        let dom = field(&row, idx["Days on Market"]).and_then(|v| parse_int(v));
        let city = field(&row, idx["City"]).map(|s| s.to_string());

        let owner_business = field(&row, idx["Owner 1 Business Name"]);
        let owner_first = field(&row, idx["Owner 1 First Name"]);
        let owner_last = field(&row, idx["Owner 1 Last Name"]);
        let owner_name = owner_business.map(|s| s.to_string()).or_else(|| {
            match (owner_first, owner_last) {
                (Some(f), Some(l)) => Some(format!("{f} {l}")),
                (Some(f), None) => Some(f.to_string()),
                (None, Some(l)) => Some(l.to_string()),
                (None, None) => None,
            }
        });

        let mailing_street = field(&row, idx["Owner Mailing Street"]).map(|s| s.to_string());
        let mailing_city = field(&row, idx["Owner Mailing City"]).map(|s| s.to_string());
        let mailing_zip = field(&row, idx["Owner Mailing Zip"]).map(|s| s.to_string());

        let mut previous_owners = Vec::new();
        if let Some(p1) = field(&row, idx["Previous Owner 1"]) {
            previous_owners.push(p1.to_string());
        }
        if let Some(p2) = field(&row, idx["Previous Owner 2"]) {
            previous_owners.push(p2.to_string());
        }

        let zip_differs = mailing_zip
            .as_deref()
            .map(|z| normalize(z) != normalize(zip))
            .unwrap_or(false);
        let street_differs = mailing_street
            .as_deref()
            .map(|ms| normalize(ms) != normalize(street))
            .unwrap_or(false);
        let absentee_owner = zip_differs || street_differs;
        let investor_owned = owner_name.as_deref().map(is_investor_token).unwrap_or(false);
        let flip_history = previous_owners.iter().any(|o| is_investor_token(o));
        let motivated_seller = dom.map(|d| d >= 60).unwrap_or(false);

        let property = Property {
            street_address: street.to_string(),
            city,
            postal_code: zip.to_string(),
            list_price: price,
            bedrooms: beds,
            bathrooms: baths,
            square_feet: sqft,
            days_on_market: dom,
            property_type,
            status,
            deal_quality: None,
            opportunity_score: None,
            enrichment: None,
        };
        let enrichment = EnrichmentBlock {
            owner_name,
            mailing_street,
            mailing_city,
            mailing_postal_code: mailing_zip,
            previous_owners,
            absentee_owner,
            investor_owned,
            flip_history,
            motivated_seller,
        };
        records.push((property, enrichment));
    }

    Ok((records, report))
}

fn parse_money(v: &str) -> Option<i64> {
    let cleaned: String = v.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
    cleaned.parse().ok()
}

fn parse_int(v: &str) -> Option<i64> {
    let cleaned: String = v.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
    cleaned.parse().ok()
}

/// Merge parsed feed records into the existing snapshot's properties,
/// keyed by canonical `property_key`. Existing snapshot fields (price,
/// size, status) win on conflict; only ownership-specific fields are
/// ever taken from the feed. Properties with no existing counterpart
/// are added using the feed's own core fields, since the feed is their
/// only source. Idempotent: merging the same feed twice is a no-op on
/// the second pass.
pub fn merge_into_snapshot(
    existing: &[Property],
    feed: Vec<(Property, EnrichmentBlock)>,
    report: &mut EnrichmentReport,
) -> Vec<Property> {
    let mut by_key: HashMap<String, Property> = existing
        .iter()
        .cloned()
        .map(|p| (p.property_key(), p))
        .collect();

    for (feed_property, enrichment) in feed {
        let key = feed_property.property_key();
        match by_key.get_mut(&key) {
            Some(existing_property) => {
                existing_property.enrichment = Some(enrichment);
                if existing_property.city.is_none() {
                    existing_property.city = feed_property.city;
                }
            }
            None => {
                let mut new_property = feed_property;
                new_property.enrichment = Some(enrichment);
                by_key.insert(key, new_property);
            }
        }
        report.rows_merged += 1;
    }

    by_key.into_values().collect()
}

/// Convenience entry point used by the ingest HTTP handler: parse then
/// merge in one call, returning the new property list and a report.
pub fn ingest(
    existing: &[Property],
    csv_bytes: &[u8],
) -> EngineResult<(Vec<Property>, EnrichmentReport)> {
    let (feed, mut report) = parse_feed(csv_bytes)?;
    if feed.is_empty() && report.rows_read == 0 {
        return Err(EngineError::InvalidCriteria("empty enrichment feed".into()));
    }
    let merged = merge_into_snapshot(existing, feed, &mut report);
    Ok((merged, report))
}
