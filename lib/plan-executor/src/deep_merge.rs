use serde_json::Value;

/// Deeply merges `source` into `self`, mutating in place.
///
/// Objects merge key-wise, arrays merge element-wise by index, a later
/// scalar wins, and a null never overwrites a concrete value (it only fills
/// positions that are absent or already null). Not commutative; callers
/// sequence merges in execution order.
pub trait DeepMerge {
    fn deep_merge(&mut self, source: Value);
}

impl DeepMerge for Value {
    fn deep_merge(&mut self, source: Value) {
        match (self, source) {
            (Value::Object(target_map), Value::Object(source_map)) => {
                for (key, source_value) in source_map {
                    match target_map.get_mut(&key) {
                        Some(target_value) => target_value.deep_merge(source_value),
                        None => {
                            target_map.insert(key, source_value);
                        }
                    }
                }
            }
            (Value::Array(target_arr), Value::Array(source_arr)) => {
                for (target_value, source_value) in target_arr.iter_mut().zip(source_arr) {
                    target_value.deep_merge(source_value);
                }
            }
            (target, source) => {
                if !source.is_null() || target.is_null() {
                    *target = source;
                }
            }
        }
    }
}
