use super::*;
use proptest::prelude::*;
use serde_json::json;

fn digest_for(inputs: &StepInputs) -> String {
    let canonical = canonicalize_inputs(inputs).unwrap();
    inputs_digest(&canonical)
}

#[test]
fn stable_stringify_sorts_object_keys() {
    let a = json!({"b": 1, "a": 2});
    let b = json!({"a": 2, "b": 1});
    assert_eq!(stable_stringify(&a), stable_stringify(&b));
    assert_eq!(stable_stringify(&a), r#"{"a":2,"b":1}"#);
}

#[test]
fn stable_stringify_preserves_array_order() {
    let v = json!([3, 1, 2]);
    assert_eq!(stable_stringify(&v), "[3,1,2]");
}

#[test]
fn stable_stringify_sorts_nested_objects() {
    let v = json!({"outer": {"z": 1, "a": {"y": 2, "x": 3}}});
    assert_eq!(
        stable_stringify(&v),
        r#"{"outer":{"a":{"x":3,"y":2},"z":1}}"#
    );
}

#[test]
fn inputs_digest_is_64_char_lowercase_hex() {
    let inputs = StepInputs {
        repo_hash: Some("abc123".into()),
        ..Default::default()
    };
    let digest = digest_for(&inputs);
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn equivalent_param_key_order_produces_equal_digest() {
    let a = StepInputs {
        params: Some(json!({"b": 1, "a": 2})),
        ..Default::default()
    };
    let b = StepInputs {
        params: Some(json!({"a": 2, "b": 1})),
        ..Default::default()
    };
    assert_eq!(digest_for(&a), digest_for(&b));
}

#[test]
fn differently_cased_path_separators_produce_equal_digest() {
    let a = StepInputs {
        file_paths: Some(vec!["a\\b\\c".into(), "x/y".into()]),
        ..Default::default()
    };
    let b = StepInputs {
        file_paths: Some(vec!["a/b/c".into(), "x/y".into()]),
        ..Default::default()
    };
    assert_eq!(digest_for(&a), digest_for(&b));
}

#[test]
fn differently_ordered_file_lists_produce_equal_digest() {
    let a = StepInputs {
        file_paths: Some(vec!["b.txt".into(), "a.txt".into()]),
        ..Default::default()
    };
    let b = StepInputs {
        file_paths: Some(vec!["a.txt".into(), "b.txt".into()]),
        ..Default::default()
    };
    assert_eq!(digest_for(&a), digest_for(&b));
}

#[test]
fn differently_ordered_artifact_refs_produce_equal_digest() {
    let a = StepInputs {
        artifact_refs: Some(vec![
            ArtifactRef { workspace: "w".into(), name: Some("b".into()), id: None, version: None },
            ArtifactRef { workspace: "w".into(), name: Some("a".into()), id: None, version: None },
        ]),
        ..Default::default()
    };
    let b = StepInputs {
        artifact_refs: Some(vec![
            ArtifactRef { workspace: "w".into(), name: Some("a".into()), id: None, version: None },
            ArtifactRef { workspace: "w".into(), name: Some("b".into()), id: None, version: None },
        ]),
        ..Default::default()
    };
    assert_eq!(digest_for(&a), digest_for(&b));
}

#[test]
fn artifact_ref_missing_name_and_id_fails() {
    let inputs = StepInputs {
        artifact_refs: Some(vec![ArtifactRef {
            workspace: "w".into(),
            name: None,
            id: None,
            version: None,
        }]),
        ..Default::default()
    };
    assert!(canonicalize_inputs(&inputs).is_err());
}

#[test]
fn empty_collections_are_dropped_not_hashed_differently() {
    let a = StepInputs {
        file_paths: Some(vec![]),
        artifact_refs: Some(vec![]),
        params: Some(json!({})),
        ..Default::default()
    };
    let b = StepInputs::default();
    assert_eq!(digest_for(&a), digest_for(&b));
}

#[test]
fn changing_repo_hash_changes_step_instance_id() {
    let base = step_instance_id("step-1", "digest-a", "gpt", "v1", "p1");
    let changed = step_instance_id("step-1", "digest-b", "gpt", "v1", "p1");
    assert_ne!(base, changed);
}

#[test]
fn changing_model_or_schema_or_prompt_version_changes_step_instance_id() {
    let base = step_instance_id("step-1", "digest", "model-a", "v1", "p1");
    assert_ne!(base, step_instance_id("step-1", "digest", "model-b", "v1", "p1"));
    assert_ne!(base, step_instance_id("step-1", "digest", "model-a", "v2", "p1"));
    assert_ne!(base, step_instance_id("step-1", "digest", "model-a", "v1", "p2"));
    assert_ne!(base, step_instance_id("step-2", "digest", "model-a", "v1", "p1"));
}

#[test]
fn step_instance_id_is_64_char_lowercase_hex() {
    let id = step_instance_id("step-1", "digest", "model", "v1", "p1");
    assert_eq!(id.len(), 64);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

fn object_from_pairs(pairs: &[(String, i64)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k.clone(), json!(v));
    }
    serde_json::Value::Object(map)
}

proptest! {
    /// stable_stringify must not care which order the caller built the
    /// object's keys in; only the sorted key/value pairs matter.
    #[test]
    fn stable_stringify_is_order_independent(mut pairs in prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 1..10)) {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|a, b| a.0 == b.0);
        let forward = object_from_pairs(&pairs);
        let mut shuffled = pairs.clone();
        shuffled.reverse();
        let backward = object_from_pairs(&shuffled);
        prop_assert_eq!(stable_stringify(&forward), stable_stringify(&backward));
    }

    /// Two StepInputs whose `params` differ only in key insertion order
    /// must fingerprint identically — this is the whole point of
    /// canonicalization.
    #[test]
    fn inputs_digest_is_stable_under_params_key_shuffle(mut pairs in prop::collection::vec(("[a-z]{1,6}", any::<i32>()), 1..10)) {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|a, b| a.0 == b.0);
        let forward = pairs.iter().map(|(k, v)| (k.clone(), *v as i64)).collect::<Vec<_>>();
        let mut backward = forward.clone();
        backward.reverse();
        let a = StepInputs { params: Some(object_from_pairs(&forward)), ..Default::default() };
        let b = StepInputs { params: Some(object_from_pairs(&backward)), ..Default::default() };
        prop_assert_eq!(digest_for(&a), digest_for(&b));
    }

    /// Fingerprinting the same inputs twice always yields the same digest.
    #[test]
    fn inputs_digest_is_deterministic(pairs in prop::collection::vec(("[a-z]{1,6}", any::<i32>()), 0..10), repo_hash in "[a-f0-9]{0,40}") {
        let params = pairs.iter().map(|(k, v)| (k.clone(), *v as i64)).collect::<Vec<_>>();
        let inputs = StepInputs {
            repo_hash: if repo_hash.is_empty() { None } else { Some(repo_hash) },
            params: Some(object_from_pairs(&params)),
            ..Default::default()
        };
        prop_assert_eq!(digest_for(&inputs), digest_for(&inputs));
    }
}
