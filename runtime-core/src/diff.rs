//! Structural diff/patch codec over `serde_json::Value` trees. The runtime
//! never hand-rolls a per-game delta type the way the teacher's games did
//! (`tic_tac_toe::ViewStateDelta`); instead every game gets the same
//! generic codec, walking state structurally.

use crate::logger::Logger;
use protocol::{Patch, PatchOp};
use serde_json::Value;

/// Computes the ordered, minimal patch list that turns `old` into `new`.
///
/// Mappings are diffed by key: `new`'s keys are walked in insertion order
/// (requires `serde_json`'s `preserve_order` feature) to emit `add`/
/// `replace`, then `old`'s keys not present in `new` are walked to emit
/// `remove`. Sequences are diffed positionally: the common prefix emits
/// `replace` for differing indices, a longer `new` emits `add` for the
/// trailing indices, and a longer `old` emits `remove` for the trailing
/// indices from the end backwards, so a client replaying removes never
/// shifts an index it hasn't processed yet.
pub fn diff(old: &Value, new: &Value) -> Vec<Patch> {
    let mut patches = Vec::new();
    diff_at(&mut Vec::new(), old, new, &mut patches);
    patches
}

fn diff_at(path: &mut Vec<String>, old: &Value, new: &Value, out: &mut Vec<Patch>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_value) in new_map.iter() {
                path.push(key.clone());
                match old_map.get(key) {
                    Some(old_value) => diff_at(path, old_value, new_value, out),
                    None => out.push(Patch {
                        op: PatchOp::Add,
                        path: path.clone(),
                        value: Some(new_value.clone()),
                    }),
                }
                path.pop();
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    path.push(key.clone());
                    out.push(Patch {
                        op: PatchOp::Remove,
                        path: path.clone(),
                        value: None,
                    });
                    path.pop();
                }
            }
        }
        (Value::Array(old_seq), Value::Array(new_seq)) => {
            let common = old_seq.len().min(new_seq.len());
            for index in 0..common {
                path.push(index.to_string());
                diff_at(path, &old_seq[index], &new_seq[index], out);
                path.pop();
            }
            for index in common..new_seq.len() {
                path.push(index.to_string());
                out.push(Patch {
                    op: PatchOp::Add,
                    path: path.clone(),
                    value: Some(new_seq[index].clone()),
                });
                path.pop();
            }
            for index in (common..old_seq.len()).rev() {
                path.push(index.to_string());
                out.push(Patch {
                    op: PatchOp::Remove,
                    path: path.clone(),
                    value: None,
                });
                path.pop();
            }
        }
        _ => out.push(Patch {
            op: PatchOp::Replace,
            path: path.clone(),
            value: Some(new.clone()),
        }),
    }
}

/// Applies `patches` to `state` in order. A patch whose path is
/// unreachable is logged via `logger` and skipped rather than failing the
/// whole batch, per the "log and discard, continue with best effort"
/// policy for `PatchApplyFailed`.
pub fn apply(state: &mut Value, patches: &[Patch], logger: &Logger) {
    for patch in patches {
        if apply_one(state, patch).is_none() {
            logger.error(
                "failed to apply patch: path unreachable",
                serde_json::json!({"path": patch.path, "op": format!("{:?}", patch.op)}),
            );
        }
    }
}

fn apply_one(state: &mut Value, patch: &Patch) -> Option<()> {
    let Some((last, ancestors)) = patch.path.split_last() else {
        // Empty path: replace the root wholesale.
        *state = patch.value.clone()?;
        return Some(());
    };

    let mut target = state;
    for key in ancestors {
        target = step_into(target, key)?;
    }

    match target {
        Value::Object(map) => match patch.op {
            PatchOp::Add | PatchOp::Replace => {
                map.insert(last.clone(), patch.value.clone()?);
            }
            PatchOp::Remove => {
                map.remove(last)?;
            }
        },
        Value::Array(seq) => {
            let index: usize = last.parse().ok()?;
            match patch.op {
                PatchOp::Add => {
                    if index > seq.len() {
                        return None;
                    }
                    seq.insert(index, patch.value.clone()?);
                }
                PatchOp::Replace => {
                    *seq.get_mut(index)? = patch.value.clone()?;
                }
                PatchOp::Remove => {
                    if index >= seq.len() {
                        return None;
                    }
                    seq.remove(index);
                }
            }
        }
        _ => return None,
    }
    Some(())
}

/// Steps one key into an existing mapping/sequence. Never fabricates a
/// missing ancestor: the containing path must already exist.
fn step_into<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(key),
        Value::Array(seq) => seq.get_mut(key.parse::<usize>().ok()?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply_for_test(state: &Value, patches: &[Patch]) -> Value {
        let mut state = state.clone();
        apply(&mut state, patches, &Logger::new("test"));
        state
    }

    #[test]
    fn round_trips_nested_mutation() {
        let old = json!({"players": {"p1": {"x": 0, "y": 0, "hp": 100}, "p2": {"x": 5, "y": 5, "hp": 100}}});
        let new = json!({"players": {"p1": {"x": 10, "y": 0, "hp": 100}, "p2": {"x": 5, "y": 5, "hp": 80}}});

        let patches = diff(&old, &new);
        assert_eq!(patches.len(), 2);
        assert_eq!(apply_for_test(&old, &patches), new);
    }

    #[test]
    fn detects_added_and_removed_keys() {
        let old = json!({"a": 1, "b": 2});
        let new = json!({"b": 2, "c": 3});
        let patches = diff(&old, &new);
        assert_eq!(apply_for_test(&old, &patches), new);
        assert!(patches.iter().any(|p| p.op == PatchOp::Add && p.path == vec!["c"]));
        assert!(patches.iter().any(|p| p.op == PatchOp::Remove && p.path == vec!["a"]));
    }

    #[test]
    fn array_shrink_removes_from_the_end_backwards() {
        let old = json!({"items": [1, 2, 3, 4]});
        let new = json!({"items": [1, 2]});
        let patches = diff(&old, &new);
        assert_eq!(apply_for_test(&old, &patches), new);
        let remove_paths: Vec<_> = patches
            .iter()
            .filter(|p| p.op == PatchOp::Remove)
            .map(|p| p.path.last().unwrap().clone())
            .collect();
        assert_eq!(remove_paths, vec!["3".to_string(), "2".to_string()]);
    }

    #[test]
    fn array_growth_appends() {
        let old = json!({"items": [1]});
        let new = json!({"items": [1, 2, 3]});
        let patches = diff(&old, &new);
        assert_eq!(apply_for_test(&old, &patches), new);
    }

    #[test]
    fn identical_states_produce_no_patches() {
        let state = json!({"a": [1, {"b": 2}]});
        assert!(diff(&state, &state).is_empty());
    }

    #[test]
    fn unreachable_patch_path_is_skipped_not_fatal() {
        let mut state = json!({"a": 1});
        let patches = vec![Patch {
            op: PatchOp::Replace,
            path: vec!["missing".into(), "deep".into()],
            value: Some(json!(5)),
        }];
        apply(&mut state, &patches, &Logger::new("test"));
        assert_eq!(state, json!({"a": 1}));
    }

    #[test]
    fn diff_apply_round_trip_property_like_cases() {
        let cases = [
            (json!(1), json!(2)),
            (json!(null), json!({"x": 1})),
            (json!([1, 2, 3]), json!([1, 2])),
            (json!({"a": {"b": [1, 2]}}), json!({"a": {"b": [1, 2, 3]}})),
        ];
        for (old, new) in cases {
            let patches = diff(&old, &new);
            assert_eq!(apply_for_test(&old, &patches), new);
        }
    }
}
