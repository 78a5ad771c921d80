use rusqlite::{params, OptionalExtension};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Criteria, CriteriaId, DealQuality};

use super::SessionStore;

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Criteria> {
    let locations_json: String = row.get(1)?;
    let property_types_json: String = row.get(6)?;
    let deal_quality_json: String = row.get(7)?;

    let locations: Vec<String> = serde_json::from_str(&locations_json).unwrap_or_default();
    let property_types: Vec<String> =
        serde_json::from_str(&property_types_json).unwrap_or_default();
    let deal_quality_strs: Vec<String> =
        serde_json::from_str(&deal_quality_json).unwrap_or_default();
    let deal_quality = deal_quality_strs
        .iter()
        .filter_map(|s| DealQuality::parse(s))
        .collect();

    Ok(Criteria {
        id: row.get(0)?,
        locations,
        price_min: row.get(2)?,
        price_max: row.get(3)?,
        bedrooms_min: row.get(4)?,
        bathrooms_min: row.get(5)?,
        property_types,
        deal_quality,
        min_score: row.get::<_, i64>(8)? as u8,
        investment_type: row.get(9)?,
    })
}

impl SessionStore {
    pub fn create_criteria(&self, criteria: &Criteria) -> EngineResult<()> {
        criteria.validate().map_err(EngineError::InvalidCriteria)?;
        let conn = self.conn.lock();
        let locations_json = serde_json::to_string(&criteria.locations)?;
        let property_types_json = serde_json::to_string(&criteria.property_types)?;
        let deal_quality_json = serde_json::to_string(
            &criteria
                .deal_quality
                .iter()
                .map(|q| q.as_str())
                .collect::<Vec<_>>(),
        )?;
        conn.execute(
            "INSERT INTO criteria (id, locations_json, price_min, price_max, bedrooms_min,
                                   bathrooms_min, property_types_json, deal_quality_json,
                                   min_score, investment_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                criteria.id,
                locations_json,
                criteria.price_min,
                criteria.price_max,
                criteria.bedrooms_min,
                criteria.bathrooms_min,
                property_types_json,
                deal_quality_json,
                criteria.min_score as i64,
                criteria.investment_type,
            ],
        )?;
        Ok(())
    }

    pub fn get_criteria(&self, id: &CriteriaId) -> EngineResult<Criteria> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, locations_json, price_min, price_max, bedrooms_min, bathrooms_min,
                    property_types_json, deal_quality_json, min_score, investment_type
             FROM criteria WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound {
            kind: "criteria",
            id: id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> Criteria {
        Criteria {
            id: id.into(),
            locations: vec!["92128".into()],
            price_min: Some(500_000),
            price_max: Some(900_000),
            bedrooms_min: Some(3.0),
            bathrooms_min: Some(2.0),
            property_types: vec!["single_family".into()],
            deal_quality: vec![DealQuality::Hot, DealQuality::Good],
            min_score: 70,
            investment_type: None,
        }
    }

    #[test]
    fn create_and_get_roundtrips_all_fields() {
        let store = SessionStore::open_in_memory().unwrap();
        let criteria = sample("crit-1");
        store.create_criteria(&criteria).unwrap();
        let fetched = store.get_criteria(&"crit-1".to_string()).unwrap();
        assert_eq!(fetched.locations, vec!["92128".to_string()]);
        assert_eq!(fetched.price_min, Some(500_000));
        assert_eq!(fetched.deal_quality.len(), 2);
        assert_eq!(fetched.min_score, 70);
    }

    #[test]
    fn create_rejects_invalid_criteria() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut criteria = sample("crit-2");
        criteria.locations = vec![];
        let err = store.create_criteria(&criteria).unwrap_err();
        assert!(matches!(err, EngineError::InvalidCriteria(_)));
    }
}
