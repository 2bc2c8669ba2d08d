use super::*;

#[test]
fn store_error_messages_name_offending_ids() {
    let err = ArtifactStoreError::VersionMismatch {
        id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
        expected: 3,
        found: 4,
    };
    let msg = err.to_string();
    assert!(msg.contains("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
    assert!(msg.contains('3'));
    assert!(msg.contains('4'));
}

#[test]
fn executor_error_wraps_store_error_transparently() {
    let store_err = ArtifactStoreError::NotFound {
        addr: "runs/run-1".into(),
    };
    let exec_err: ExecutorError = store_err.clone().into();
    match exec_err {
        ExecutorError::Store(inner) => assert_eq!(inner, store_err),
        other => panic!("expected Store variant, got {other:?}"),
    }
}

#[test]
fn cycle_detected_carries_surviving_nodes() {
    let err = ExecutorError::CycleDetected(vec!["a".into(), "b".into()]);
    let msg = err.to_string();
    assert!(msg.contains('a'));
    assert!(msg.contains('b'));
}
