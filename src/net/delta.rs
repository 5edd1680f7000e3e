//! Delta compression for per-observer updates
//!
//! Diffs an observer's current JSON snapshot against the one it was sent on
//! the previous tick, so only changed fields go over the wire.
//!
//! Reserved shapes inside a delta:
//! - `null` on an object key: the key was removed
//! - `{"_arr": {"<index>": delta}}`: sparse patch of a same-length array
//! - `{"dx", "dy", "_rel": true}`: relative position (ADVANCED)
//! - `{"dr", "_rel": true}`: relative rotation (ADVANCED)
//!
//! Explicit `null` object values are indistinguishable from absent keys once
//! they pass through a delta, so snapshots must not carry them (see
//! `snapshot::entity_state`). A rotation change that crosses the +-PI seam is
//! sent absolute, which keeps `prev + dr` exact on the client.

use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};

use std::f64::consts::PI;

use crate::util::wrap_angle_f64;

// ============================================================================
// Constants
// ============================================================================

/// Marks a relative position or rotation update
const REL_MARKER: &str = "_rel";

/// Wraps a sparse array patch keyed by element index
const ARRAY_PATCH: &str = "_arr";

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Always send the full snapshot
    None,
    /// Structural field diff
    Basic,
    /// Field diff plus relative position/rotation encoding
    Advanced,
}

impl CompressionLevel {
    /// Parse `none`, `basic` or `advanced` (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "basic" => Some(Self::Basic),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionOptions {
    pub level: CompressionLevel,
    /// Sent verbatim at every object level, changed or not
    pub priority_fields: Vec<String>,
    /// Never diffed or sent
    pub ignore_fields: Vec<String>,
    /// Position moves smaller than this on both axes are sent relative
    pub relative_position_threshold: f64,
    /// Rotation changes smaller than this (radians) are sent relative
    pub relative_rotation_threshold: f64,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            level: CompressionLevel::Advanced,
            priority_fields: vec!["id".to_string(), "position".to_string()],
            ignore_fields: vec!["_id".to_string(), "_rev".to_string(), "lastUpdated".to_string()],
            relative_position_threshold: 100.0,
            relative_rotation_threshold: 0.5,
        }
    }
}

impl CompressionOptions {
    fn is_priority(&self, key: &str) -> bool {
        self.priority_fields.iter().any(|f| f == key)
    }

    fn is_ignored(&self, key: &str) -> bool {
        self.ignore_fields.iter().any(|f| f == key)
    }
}

// ============================================================================
// Updates
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressionStats {
    /// Serialized size of the full current snapshot (bytes)
    pub original_size: usize,
    /// Serialized size of what is actually sent (bytes)
    pub compressed_size: usize,
    pub compression_ratio: f32,
    pub field_count: usize,
    pub unchanged_field_count: usize,
    pub processing_time_us: u64,
}

impl CompressionStats {
    pub fn bytes_saved(&self) -> usize {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

/// One observer's update for one tick
#[derive(Debug, Clone, Serialize)]
pub struct DeltaUpdate {
    pub tick: u64,
    /// True when `delta` is the complete snapshot
    pub full: bool,
    pub delta: Value,
    pub stats: CompressionStats,
}

impl DeltaUpdate {
    /// No change at all since the previous snapshot
    pub fn is_empty(&self) -> bool {
        !self.full && self.delta.as_object().is_some_and(Map::is_empty)
    }
}

// ============================================================================
// Diff
// ============================================================================

struct Diff {
    delta: Option<Value>,
    field_count: usize,
    unchanged: usize,
}

fn diff_value(current: &Value, previous: &Value, opts: &CompressionOptions) -> Diff {
    match (current, previous) {
        (Value::Object(cur), Value::Object(prev)) => diff_object(cur, prev, opts),
        (Value::Array(cur), Value::Array(prev)) => diff_array(cur, prev, opts),
        _ => {
            let same = current == previous;
            Diff {
                delta: (!same).then(|| current.clone()),
                field_count: 1,
                unchanged: same as usize,
            }
        }
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn diff_object(current: &Map<String, Value>, previous: &Map<String, Value>, opts: &CompressionOptions) -> Diff {
    let mut delta = Map::new();
    let mut field_count = 0;
    let mut unchanged = 0;

    for (key, cur) in current {
        if opts.is_ignored(key) {
            continue;
        }
        field_count += 1;

        if opts.is_priority(key) {
            if previous.get(key) == Some(cur) {
                unchanged += 1;
            }
            delta.insert(key.clone(), cur.clone());
            continue;
        }

        let Some(prev) = previous.get(key) else {
            delta.insert(key.clone(), cur.clone());
            continue;
        };

        match cur {
            Value::Object(_) | Value::Array(_) if same_kind(cur, prev) => {
                let nested = diff_value(cur, prev, opts);
                // The key itself was counted above
                field_count = field_count - 1 + nested.field_count;
                unchanged += nested.unchanged;
                if let Some(d) = nested.delta {
                    delta.insert(key.clone(), d);
                }
            }
            _ if cur == prev => unchanged += 1,
            _ => {
                delta.insert(key.clone(), cur.clone());
            }
        }
    }

    for key in previous.keys() {
        if !current.contains_key(key) && !opts.is_ignored(key) {
            delta.insert(key.clone(), Value::Null);
        }
    }

    Diff {
        delta: (!delta.is_empty()).then_some(Value::Object(delta)),
        field_count,
        unchanged,
    }
}

fn diff_array(current: &[Value], previous: &[Value], opts: &CompressionOptions) -> Diff {
    if current.len() != previous.len() {
        return Diff {
            delta: Some(Value::Array(current.to_vec())),
            field_count: current.len(),
            unchanged: 0,
        };
    }

    let mut patch = Map::new();
    let mut field_count = 0;
    let mut unchanged = 0;
    for (i, (cur, prev)) in current.iter().zip(previous).enumerate() {
        let element = diff_value(cur, prev, opts);
        field_count += element.field_count;
        unchanged += element.unchanged;
        if let Some(d) = element.delta {
            patch.insert(i.to_string(), d);
        }
    }

    let delta = (!patch.is_empty()).then(|| {
        let mut wrapper = Map::new();
        wrapper.insert(ARRAY_PATCH.to_string(), Value::Object(patch));
        Value::Object(wrapper)
    });
    Diff {
        delta,
        field_count,
        unchanged,
    }
}

fn count_fields(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(count_fields).sum(),
        Value::Array(items) => items.iter().map(count_fields).sum(),
        _ => 1,
    }
}

// ============================================================================
// Relative encoding (ADVANCED)
// ============================================================================

fn xy(value: Option<&Value>) -> Option<(f64, f64)> {
    let obj = value?.as_object()?;
    Some((obj.get("x")?.as_f64()?, obj.get("y")?.as_f64()?))
}

fn is_relative(value: &Value) -> bool {
    value.get(REL_MARKER).and_then(Value::as_bool).unwrap_or(false)
}

/// Rewrite small position/rotation changes as offsets, recursing into nested
/// objects and array patches.
fn encode_relative(
    delta: &mut Map<String, Value>,
    current: &Map<String, Value>,
    previous: &Map<String, Value>,
    opts: &CompressionOptions,
) {
    if delta.contains_key("position") {
        if let (Some((cx, cy)), Some((px, py))) = (xy(current.get("position")), xy(previous.get("position"))) {
            let (dx, dy) = (cx - px, cy - py);
            let threshold = opts.relative_position_threshold;
            if dx.abs() < threshold && dy.abs() < threshold {
                let mut rel = Map::new();
                rel.insert("dx".to_string(), Value::from(dx));
                rel.insert("dy".to_string(), Value::from(dy));
                rel.insert(REL_MARKER.to_string(), Value::Bool(true));
                delta.insert("position".to_string(), Value::Object(rel));
            }
        }
    }

    if delta.contains_key("rotation") {
        let cur = current.get("rotation").and_then(Value::as_f64);
        let prev = previous.get("rotation").and_then(Value::as_f64);
        if let (Some(cur), Some(prev)) = (cur, prev) {
            let dr = cur - prev;
            if dr.abs() < opts.relative_rotation_threshold && dr.abs() <= PI {
                let mut rel = Map::new();
                rel.insert("dr".to_string(), Value::from(dr));
                rel.insert(REL_MARKER.to_string(), Value::Bool(true));
                delta.insert("rotation".to_string(), Value::Object(rel));
            }
        }
    }

    for (key, value) in delta.iter_mut() {
        if is_relative(value) {
            continue;
        }
        let Value::Object(nested) = value else {
            continue;
        };
        match (current.get(key), previous.get(key)) {
            (Some(Value::Object(cur)), Some(Value::Object(prev))) => {
                encode_relative(nested, cur, prev, opts);
            }
            (Some(Value::Array(cur)), Some(Value::Array(prev))) => {
                let Some(Value::Object(patch)) = nested.get_mut(ARRAY_PATCH) else {
                    continue;
                };
                for (index, element) in patch.iter_mut() {
                    let Ok(i) = index.parse::<usize>() else {
                        continue;
                    };
                    if let (Value::Object(d), Some(Value::Object(c)), Some(Value::Object(p))) =
                        (element, cur.get(i), prev.get(i))
                    {
                        encode_relative(d, c, p, opts);
                    }
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Apply
// ============================================================================

fn apply_value(state: &Value, delta: &Value) -> Value {
    match (state, delta) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut out = base.clone();
            for (key, change) in patch {
                if change.is_null() {
                    out.remove(key);
                    continue;
                }
                let next = match out.get(key) {
                    Some(existing) => apply_field(key, existing, change),
                    None => apply_field(key, &Value::Null, change),
                };
                out.insert(key.clone(), next);
            }
            Value::Object(out)
        }
        (Value::Array(items), Value::Object(patch)) if patch.contains_key(ARRAY_PATCH) => {
            let mut out = items.clone();
            if let Some(Value::Object(elements)) = patch.get(ARRAY_PATCH) {
                for (index, change) in elements {
                    if let Some(slot) = index.parse::<usize>().ok().and_then(|i| out.get_mut(i)) {
                        *slot = apply_element(slot, change);
                    }
                }
            }
            Value::Array(out)
        }
        _ => delta.clone(),
    }
}

/// Array elements carry no removal marker; `null` is a plain value there
fn apply_element(state: &Value, delta: &Value) -> Value {
    if delta.is_null() {
        Value::Null
    } else {
        apply_value(state, delta)
    }
}

fn apply_field(key: &str, state: &Value, change: &Value) -> Value {
    if !is_relative(change) {
        return apply_value(state, change);
    }
    let offset = |name: &str| change.get(name).and_then(Value::as_f64).unwrap_or(0.0);

    if key == "rotation" {
        let base = state.as_f64().unwrap_or(0.0);
        return Value::from(wrap_angle_f64(base + offset("dr")));
    }

    let mut position = state.as_object().cloned().unwrap_or_default();
    let (x, y) = xy(Some(state)).unwrap_or((0.0, 0.0));
    position.insert("x".to_string(), Value::from(x + offset("dx")));
    position.insert("y".to_string(), Value::from(y + offset("dy")));
    Value::Object(position)
}

/// Reconstruct the current snapshot from the previous one and an update
pub fn apply_delta(state: &Value, update: &DeltaUpdate) -> Value {
    if update.full {
        return update.delta.clone();
    }
    if update.is_empty() {
        return state.clone();
    }
    apply_value(state, &update.delta)
}

// ============================================================================
// Codec
// ============================================================================

/// Stateless delta encoder; the caller keeps each observer's previous snapshot
#[derive(Debug, Clone, Default)]
pub struct DeltaCodec {
    options: CompressionOptions,
}

impl DeltaCodec {
    pub fn new(options: CompressionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompressionOptions {
        &self.options
    }

    pub fn create_delta(&self, current: &Value, previous: Option<&Value>) -> Result<DeltaUpdate, serde_json::Error> {
        Self::create_delta_with(current, previous, &self.options)
    }

    /// Encode with explicit options. The returned update has tick 0; the
    /// caller stamps it.
    pub fn create_delta_with(
        current: &Value,
        previous: Option<&Value>,
        options: &CompressionOptions,
    ) -> Result<DeltaUpdate, serde_json::Error> {
        let start = Instant::now();
        let original_size = serde_json::to_vec(current)?.len();

        let previous = match previous {
            Some(prev) if options.level != CompressionLevel::None => prev,
            _ => {
                return Ok(DeltaUpdate {
                    tick: 0,
                    full: true,
                    delta: current.clone(),
                    stats: CompressionStats {
                        original_size,
                        compressed_size: original_size,
                        compression_ratio: 1.0,
                        field_count: count_fields(current),
                        unchanged_field_count: 0,
                        processing_time_us: start.elapsed().as_micros() as u64,
                    },
                });
            }
        };

        let diff = diff_value(current, previous, options);
        let mut delta = diff.delta.unwrap_or_else(|| Value::Object(Map::new()));

        if options.level == CompressionLevel::Advanced {
            if let (Value::Object(d), Value::Object(cur), Value::Object(prev)) = (&mut delta, current, previous) {
                encode_relative(d, cur, prev, options);
            }
        }

        let compressed_size = serde_json::to_vec(&delta)?.len();
        let compression_ratio = if compressed_size > 0 {
            original_size as f32 / compressed_size as f32
        } else {
            1.0
        };

        Ok(DeltaUpdate {
            tick: 0,
            full: false,
            delta,
            stats: CompressionStats {
                original_size,
                compressed_size,
                compression_ratio,
                field_count: diff.field_count,
                unchanged_field_count: diff.unchanged,
                processing_time_us: start.elapsed().as_micros() as u64,
            },
        })
    }

    pub fn apply_delta(&self, state: &Value, update: &DeltaUpdate) -> Value {
        apply_delta(state, update)
    }
}

// ============================================================================
// Tests
// ============================================================================
