// Dealwatch Engine: Match Engine (§4.3 / C3)
//
// Given Criteria, a Snapshot, and an agent's existing Match set, produces
// NewMatch and PriceDrop events. Pure and deterministic: no I/O, no
// randomness, ordering follows snapshot iteration order.

use std::collections::HashMap;

use crate::atoms::constants::{SCORE_BASE, SCORE_MAX, SCORE_MIN};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Criteria, NewMatchOutcome, PriceDropOutcome, Property, PropertyStatus};

/// The subset of an agent's existing matches the engine needs: the
/// captured price at match time, keyed by `property_key`.
pub type ExistingMatches<'a> = &'a HashMap<String, i64>;

fn is_candidate(property: &Property, criteria: &Criteria) -> bool {
    if property.status != PropertyStatus::Active {
        return false;
    }
    if !criteria.locations.iter().any(|loc| loc == &property.postal_code) {
        return false;
    }
    let Some(price) = property.list_price else {
        return false;
    };
    if let Some(min) = criteria.price_min {
        if price < min {
            return false;
        }
    }
    if let Some(max) = criteria.price_max {
        if price > max {
            return false;
        }
    }
    if let Some(min_beds) = criteria.bedrooms_min {
        match property.bedrooms {
            Some(beds) if beds >= min_beds => {}
            _ => return false,
        }
    }
    if let Some(min_baths) = criteria.bathrooms_min {
        match property.bathrooms {
            Some(baths) if baths >= min_baths => {}
            _ => return false,
        }
    }
    if !criteria.property_types.is_empty() {
        match &property.property_type {
            Some(pt) if criteria.property_types.iter().any(|t| t == pt) => {}
            _ => return false,
        }
    }
    if !criteria.deal_quality.is_empty() {
        match property.deal_quality {
            Some(dq) if criteria.deal_quality.contains(&dq) => {}
            _ => return false,
        }
    }
    true
}

struct ScoreResult {
    score: i32,
    reasons: Vec<String>,
}

fn price_fit_score(price: i64, criteria: &Criteria, reasons: &mut Vec<String>) -> i32 {
    match (criteria.price_min, criteria.price_max) {
        (Some(min), _) if price <= min => {
            reasons.push("at or below budget".into());
            20
        }
        (_, Some(max)) if price > max => {
            let over_pct = ((price - max) as f64 / max as f64) * 100.0;
            if over_pct <= 10.0 {
                reasons.push("within 10% of budget ceiling".into());
                0
            } else {
                reasons.push("exceeds budget ceiling by more than 10%".into());
                -20
            }
        }
        (Some(_), _) | (_, Some(_)) => {
            reasons.push("within budget".into());
            10
        }
        (None, None) => 0,
    }
}

fn size_score(property: &Property, criteria: &Criteria, reasons: &mut Vec<String>) -> i32 {
    let mut margins = Vec::new();
    if let (Some(min), Some(beds)) = (criteria.bedrooms_min, property.bedrooms) {
        margins.push(beds - min);
    }
    if let (Some(min), Some(baths)) = (criteria.bathrooms_min, property.bathrooms) {
        margins.push(baths - min);
    }
    if margins.is_empty() {
        return 0;
    }
    let min_margin = margins.into_iter().fold(f64::INFINITY, f64::min);
    if min_margin >= 2.0 {
        reasons.push("exceeds size minimums by 2 or more".into());
        10
    } else if min_margin >= 1.0 {
        reasons.push("exceeds size minimums by 1".into());
        5
    } else if min_margin >= 0.0 {
        0
    } else {
        reasons.push("below requested size minimums".into());
        -10
    }
}

fn dom_score(dom: Option<i64>, reasons: &mut Vec<String>) -> i32 {
    match dom {
        Some(d) if d >= 60 => {
            reasons.push("on market 60+ days".into());
            5
        }
        Some(d) if d >= 30 => {
            reasons.push("on market 30-59 days".into());
            3
        }
        _ => 0,
    }
}

fn enrichment_score(property: &Property, reasons: &mut Vec<String>) -> i32 {
    let Some(enrichment) = &property.enrichment else {
        return 0;
    };
    let mut total = 0;
    if enrichment.absentee_owner {
        reasons.push("absentee owner".into());
        total += 10;
    }
    if enrichment.investor_owned {
        reasons.push("investor-owned".into());
        total += 5;
    }
    if enrichment.flip_history {
        reasons.push("flip history".into());
        total += 5;
    }
    if enrichment.motivated_seller {
        reasons.push("motivated seller".into());
        total += 5;
    }
    total
}

fn score_candidate(property: &Property, criteria: &Criteria) -> ScoreResult {
    let mut reasons = Vec::new();

    let raw_score = if let Some(opportunity_score) = property.opportunity_score {
        reasons.push(format!("upstream opportunity score {opportunity_score}"));
        opportunity_score as i32 + enrichment_score(property, &mut reasons)
    } else {
        reasons.push(format!("exact postal match {}", property.postal_code));
        let mut total = SCORE_BASE + 30;
        if let Some(price) = property.list_price {
            total += price_fit_score(price, criteria, &mut reasons);
        }
        total += size_score(property, criteria, &mut reasons);
        total += dom_score(property.days_on_market, &mut reasons);
        total += enrichment_score(property, &mut reasons);
        total
    };

    ScoreResult {
        score: raw_score.clamp(SCORE_MIN, SCORE_MAX),
        reasons,
    }
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    New(NewMatchOutcome),
    PriceDrop(PriceDropOutcome),
}

/// Evaluate every property in `properties` against `criteria`, returning
/// outputs in snapshot iteration order. `existing` maps each already-
/// matched property key to the price captured at match time.
pub fn evaluate(
    properties: &[Property],
    criteria: &Criteria,
    existing: ExistingMatches,
) -> EngineResult<Vec<MatchOutcome>> {
    criteria
        .validate()
        .map_err(EngineError::InvalidCriteria)?;

    let mut outcomes = Vec::new();
    for property in properties {
        if !is_candidate(property, criteria) {
            continue;
        }
        let ScoreResult { score, reasons } = score_candidate(property, criteria);
        if (score as u32) < criteria.min_score as u32 {
            continue;
        }
        let key = property.property_key();
        match existing.get(&key) {
            None => outcomes.push(MatchOutcome::New(NewMatchOutcome {
                property_key: key,
                score: score as u8,
                reasons,
                property: property.clone(),
            })),
            Some(&old_price) => {
                if let Some(new_price) = property.list_price {
                    if new_price < old_price {
                        outcomes.push(MatchOutcome::PriceDrop(PriceDropOutcome {
                            property_key: key,
                            old_price,
                            new_price,
                        }));
                    }
                }
            }
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{DealQuality, EnrichmentBlock};

    fn base_criteria() -> Criteria {
        Criteria {
            id: "c1".into(),
            locations: vec!["92128".into()],
            price_min: Some(600_000),
            price_max: Some(1_200_000),
            bedrooms_min: Some(3.0),
            bathrooms_min: Some(2.0),
            property_types: vec![],
            deal_quality: vec![],
            min_score: 70,
            investment_type: None,
        }
    }

    fn base_property() -> Property {
        Property {
            street_address: "123 Main St".into(),
            city: None,
            postal_code: "92128".into(),
            list_price: Some(900_000),
            bedrooms: Some(3.0),
            bathrooms: Some(2.0),
            square_feet: Some(1800),
            days_on_market: Some(10),
            property_type: None,
            status: PropertyStatus::Active,
            deal_quality: None,
            opportunity_score: None,
            enrichment: None,
        }
    }

    #[test]
    fn scenario_a_first_match_scores_90() {
        let criteria = base_criteria();
        let property = base_property();
        let existing = HashMap::new();
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            MatchOutcome::New(m) => assert_eq!(m.score, 90),
            _ => panic!("expected NewMatch"),
        }
    }

    #[test]
    fn scenario_d_enrichment_bonus_clamps_to_100() {
        let criteria = base_criteria();
        let mut property = base_property();
        property.days_on_market = Some(65);
        property.enrichment = Some(EnrichmentBlock {
            absentee_owner: true,
            investor_owned: true,
            motivated_seller: true,
            ..Default::default()
        });
        let existing = HashMap::new();
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        match &outcomes[0] {
            MatchOutcome::New(m) => assert_eq!(m.score, 100),
            _ => panic!("expected NewMatch"),
        }
    }

    #[test]
    fn price_drop_emitted_without_new_match() {
        let criteria = base_criteria();
        let property = base_property();
        let mut existing = HashMap::new();
        existing.insert(property.property_key(), 950_000);
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            MatchOutcome::PriceDrop(p) => {
                assert_eq!(p.old_price, 950_000);
                assert_eq!(p.new_price, 900_000);
            }
            _ => panic!("expected PriceDrop"),
        }
    }

    #[test]
    fn unchanged_price_on_existing_match_emits_nothing() {
        let criteria = base_criteria();
        let property = base_property();
        let mut existing = HashMap::new();
        existing.insert(property.property_key(), 900_000);
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn pending_property_is_not_a_candidate() {
        let criteria = base_criteria();
        let mut property = base_property();
        property.status = PropertyStatus::Pending;
        let existing = HashMap::new();
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn below_min_score_is_excluded() {
        let mut criteria = base_criteria();
        criteria.min_score = 95;
        let property = base_property();
        let existing = HashMap::new();
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn opportunity_score_overrides_base_but_stacks_with_enrichment() {
        let criteria = base_criteria();
        let mut property = base_property();
        property.opportunity_score = Some(80);
        property.enrichment = Some(EnrichmentBlock {
            investor_owned: true,
            ..Default::default()
        });
        let existing = HashMap::new();
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        match &outcomes[0] {
            MatchOutcome::New(m) => assert_eq!(m.score, 85),
            _ => panic!("expected NewMatch"),
        }
    }

    #[test]
    fn invalid_criteria_rejected_before_any_emission() {
        let mut criteria = base_criteria();
        criteria.locations = vec![];
        let property = base_property();
        let existing = HashMap::new();
        let result = evaluate(&[property], &criteria, &existing);
        assert!(matches!(result, Err(EngineError::InvalidCriteria(_))));
    }

    #[test]
    fn deal_quality_filter_excludes_non_matching() {
        let mut criteria = base_criteria();
        criteria.deal_quality = vec![DealQuality::Hot];
        let mut property = base_property();
        property.deal_quality = Some(DealQuality::Fair);
        let existing = HashMap::new();
        let outcomes = evaluate(&[property], &criteria, &existing).unwrap();
        assert!(outcomes.is_empty());
    }
}
