//! Per-observer world snapshots
//!
//! A snapshot is a JSON object keyed by entity id (string form). Each value
//! carries the entity's replicated attributes plus the core fields below,
//! which win over attributes of the same name.
//!
//! An attribute set to `null` is treated as absent: object fields holding
//! `null` are dropped at any depth, since `null` is the delta codec's
//! removal marker.

use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::util::wrap_angle;

/// JSON state of one entity as sent to observers
pub fn entity_state(entity: &Entity) -> Result<Value, serde_json::Error> {
    let mut state = without_nulls(&entity.attributes);

    let mut position = Map::new();
    position.insert("x".to_string(), Value::from(entity.position.x as f64));
    position.insert("y".to_string(), Value::from(entity.position.y as f64));

    state.insert("id".to_string(), Value::String(entity.id.to_string()));
    state.insert("position".to_string(), Value::Object(position));
    state.insert("rotation".to_string(), Value::from(wrap_angle(entity.rotation) as f64));
    state.insert("faction".to_string(), Value::from(entity.faction));
    state.insert("stealth".to_string(), serde_json::to_value(entity.stealth.state())?);
    Ok(Value::Object(state))
}

fn without_nulls(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), strip_nested(value)))
        .collect()
}

fn strip_nested(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(without_nulls(map)),
        // Array elements may stay null; array patches carry them as values
        Value::Array(items) => Value::Array(items.iter().map(strip_nested).collect()),
        other => other.clone(),
    }
}

/// Snapshot of the entities at `visible` (indices into `entities`)
pub fn build_snapshot(entities: &[Entity], visible: &[usize]) -> Result<Value, serde_json::Error> {
    let mut snapshot = Map::new();
    for entity in visible.iter().filter_map(|&i| entities.get(i)) {
        snapshot.insert(entity.id.to_string(), entity_state(entity)?);
    }
    Ok(Value::Object(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::delta::{apply_delta, CompressionLevel, CompressionOptions, DeltaCodec};
    use crate::util::Vec2;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_entity_state_fields() {
        let entity = Entity::new(Uuid::new_v4(), Vec2::new(1.5, -2.0), 3)
            .with_rotation(0.5)
            .with_attribute("name", json!("Vega"))
            .with_attribute("faction", json!("overridden"));

        let state = entity_state(&entity).unwrap();
        assert_eq!(state["id"], json!(entity.id.to_string()));
        assert_eq!(state["position"], json!({ "x": 1.5, "y": -2.0 }));
        assert_eq!(state["rotation"], json!(0.5));
        assert_eq!(state["faction"], json!(3), "Core fields win over attributes");
        assert_eq!(state["stealth"], json!("inactive"));
        assert_eq!(state["name"], json!("Vega"));
    }

    #[test]
    fn test_rotation_wrapped() {
        let entity = Entity::new(Uuid::new_v4(), Vec2::ZERO, 1).with_rotation(4.0 * std::f32::consts::PI);
        let state = entity_state(&entity).unwrap();
        assert!(state["rotation"].as_f64().unwrap().abs() < 1e-5);
    }

    #[test]
    fn test_null_attributes_are_absent() {
        let entity = Entity::new(Uuid::new_v4(), Vec2::ZERO, 1)
            .with_attribute("target", Value::Null)
            .with_attribute("loadout", json!({ "primary": "rifle", "secondary": null, "slots": [1, null] }));

        let state = entity_state(&entity).unwrap();
        assert!(state.get("target").is_none());
        assert_eq!(state["loadout"], json!({ "primary": "rifle", "slots": [1, null] }));
    }

    #[test]
    fn test_attribute_set_to_null_round_trips() {
        let codec = DeltaCodec::new(CompressionOptions {
            level: CompressionLevel::Advanced,
            ..Default::default()
        });
        let mut entity = Entity::new(Uuid::new_v4(), Vec2::new(3.0, 4.0), 1)
            .with_attribute("target", json!(5))
            .with_attribute("gear", json!({ "hat": "red", "boots": "brown" }));
        let entities = vec![entity.clone()];
        let previous = build_snapshot(&entities, &[0]).unwrap();

        entity.attributes.insert("target".to_string(), Value::Null);
        entity.attributes.insert("gear".to_string(), json!({ "hat": null, "boots": "brown" }));
        let entities = vec![entity];
        let current = build_snapshot(&entities, &[0]).unwrap();

        let update = codec.create_delta(&current, Some(&previous)).unwrap();
        assert_eq!(apply_delta(&previous, &update), current);
    }

    #[test]
    fn test_snapshot_keyed_by_id() {
        let a = Entity::new(Uuid::new_v4(), Vec2::ZERO, 1);
        let b = Entity::new(Uuid::new_v4(), Vec2::new(10.0, 0.0), 2);
        let entities = vec![a.clone(), b.clone()];

        let snapshot = build_snapshot(&entities, &[1, 7]).unwrap();
        let map = snapshot.as_object().unwrap();
        assert_eq!(map.len(), 1, "Out-of-range indices are skipped");
        assert!(map.contains_key(&b.id.to_string()));
    }
}
