use super::*;
use tempfile::tempdir;
use wf_core::ArtifactId;

fn sample_artifact(id: &str, version: u64) -> Artifact {
    Artifact {
        id: ArtifactId::new(id),
        workspace: "default".into(),
        workspace_norm: "default".into(),
        name: Some("x".into()),
        name_norm: Some("x".into()),
        kind: "thing".into(),
        data: serde_json::json!({"v": version}),
        text: None,
        run_id: None,
        phase: None,
        role: None,
        tags: vec![],
        schema_version: None,
        version,
        ttl_seconds: None,
        expires_at: None,
        created_at: 1_000,
        updated_at: 1_000,
        deleted_at: None,
    }
}

#[test]
fn append_and_flush_then_reopen_replays_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        let seq1 = wal
            .append(&ArtifactMutation::Put {
                artifact: sample_artifact("id-1", 1),
            })
            .unwrap();
        let seq2 = wal
            .append(&ArtifactMutation::SoftDelete {
                id: "id-1".into(),
                deleted_at: 2_000,
            })
            .unwrap();
        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
        wal.flush().unwrap();
    }

    let wal = Wal::open(&path, 0).unwrap();
    let entries = wal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(entries[1].seq, 2);
    assert!(matches!(entries[0].mutation, ArtifactMutation::Put { .. }));
    assert!(matches!(entries[1].mutation, ArtifactMutation::SoftDelete { .. }));
}

#[test]
fn entries_after_excludes_already_processed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");
    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&ArtifactMutation::Put { artifact: sample_artifact("id-1", 1) }).unwrap();
    wal.append(&ArtifactMutation::Put { artifact: sample_artifact("id-2", 1) }).unwrap();
    wal.flush().unwrap();

    let entries = wal.entries_after(1).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 2);
}

#[test]
fn needs_flush_is_false_when_buffer_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");
    let wal = Wal::open(&path, 0).unwrap();
    assert!(!wal.needs_flush());
}

#[test]
fn needs_flush_true_once_threshold_reached() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");
    let mut wal = Wal::open(&path, 0).unwrap();
    for i in 0..100 {
        wal.append(&ArtifactMutation::Put { artifact: sample_artifact(&format!("id-{i}"), 1) })
            .unwrap();
    }
    assert!(wal.needs_flush());
}

#[test]
fn truncate_before_drops_older_entries_but_keeps_newer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");
    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&ArtifactMutation::Put { artifact: sample_artifact("id-1", 1) }).unwrap();
    wal.append(&ArtifactMutation::Put { artifact: sample_artifact("id-2", 1) }).unwrap();
    wal.append(&ArtifactMutation::Put { artifact: sample_artifact("id-3", 1) }).unwrap();
    wal.flush().unwrap();
    wal.mark_processed(3);

    wal.truncate_before(2).unwrap();

    let remaining = wal.entries_after(0).unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].seq, 2);
    assert_eq!(remaining[1].seq, 3);
}

#[test]
fn corrupt_entry_triggers_bak_rotation_and_preserves_valid_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.jsonl");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&ArtifactMutation::Put { artifact: sample_artifact("id-1", 1) }).unwrap();
        wal.flush().unwrap();
    }

    // Append a malformed line directly to simulate a torn write.
    {
        use std::io::Write as _;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{not valid json\n").unwrap();
    }

    let wal = Wal::open(&path, 0).unwrap();
    let entries = wal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(dir.path().join("wal.bak").exists());
}
