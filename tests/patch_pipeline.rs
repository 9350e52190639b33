//! Integration tests for the patch ingestion pipeline against real git
//! repositories: structural rejections, scope enforcement, the rollback
//! invariant, and format detection end to end.

use reclaim_agent::patch::{PatchError, PatchFormat, PatchIngestor};
use reclaim_agent::testing::GitFixture;

async fn seeded_fixture() -> GitFixture {
    let fixture = GitFixture::new().await;
    fixture
        .write_and_commit("app/src/foo.ts", "export const x = 1;\n")
        .await;
    fixture
        .write_and_commit("app/src/screens/Other.tsx", "export const other = 1;\n")
        .await;
    fixture
        .write_and_commit(
            "app/src/lib/training/engine.ts",
            "export function train() {}\n",
        )
        .await;
    fixture
}

/// Snapshot of tracked content for byte-identity assertions.
fn tree_snapshot(fixture: &GitFixture) -> Vec<(String, String)> {
    let mut files = Vec::new();
    for path in [
        "app/src/foo.ts",
        "app/src/screens/Other.tsx",
        "app/src/lib/training/engine.ts",
    ] {
        files.push((
            path.to_string(),
            std::fs::read_to_string(fixture.path().join(path)).unwrap(),
        ));
    }
    files
}

// =============================================================================
// Structural rejection completeness
// =============================================================================

#[tokio::test]
async fn placeholder_hunk_is_rejected_without_touching_disk() {
    let fixture = seeded_fixture().await;
    let before = tree_snapshot(&fixture);
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = "--- a/x\n+++ b/x\n@@ ... @@\n-old\n+new\n";
    let err = ingestor.ingest(raw, None).await.unwrap_err();
    assert!(matches!(err, PatchError::PlaceholderHunk));

    assert_eq!(tree_snapshot(&fixture), before);
    assert!(fixture.status().await.is_empty());
}

#[tokio::test]
async fn zero_length_hunk_is_rejected() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = "--- a/app/src/foo.ts\n+++ b/app/src/foo.ts\n@@ -5,0 +5,0 @@\n";
    let err = ingestor.ingest(raw, None).await.unwrap_err();
    assert!(matches!(err, PatchError::ZeroLengthHunk));
    assert!(fixture.status().await.is_empty());
}

#[tokio::test]
async fn missing_hunk_header_is_rejected() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = "--- a/app/src/foo.ts\n+++ b/app/src/foo.ts\n-export const x = 1;\n+export const x = 2;\n";
    let err = ingestor.ingest(raw, None).await.unwrap_err();
    assert!(matches!(err, PatchError::MissingHunkHeader));
    assert!(fixture.status().await.is_empty());
}

#[tokio::test]
async fn placeholder_path_is_rejected_by_name() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw =
        "--- a/app/src/placeholder.ts\n+++ b/app/src/placeholder.ts\n@@ -1,1 +1,1 @@\n-a\n+b\n";
    match ingestor.ingest(raw, None).await.unwrap_err() {
        PatchError::PlaceholderPath { path } => assert_eq!(path, "app/src/placeholder.ts"),
        other => panic!("expected PlaceholderPath, got {other:?}"),
    }
    assert!(fixture.status().await.is_empty());
}

#[tokio::test]
async fn nonexistent_target_file_is_rejected_by_name() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = "--- a/app/src/doesnotexist123.ts\n+++ b/app/src/doesnotexist123.ts\n@@ -1,1 +1,1 @@\n-a\n+b\n";
    match ingestor.ingest(raw, None).await.unwrap_err() {
        PatchError::TargetFileMissing { path } => {
            assert_eq!(path, "app/src/doesnotexist123.ts");
        }
        other => panic!("expected TargetFileMissing, got {other:?}"),
    }
    assert!(fixture.status().await.is_empty());
}

#[tokio::test]
async fn no_patch_text_is_no_patch_found() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let err = ingestor
        .ingest("I cannot produce a patch for this.", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PatchError::NoPatchFound));
}

// =============================================================================
// Target-scope enforcement
// =============================================================================

#[tokio::test]
async fn diff_outside_target_scope_is_rejected_and_disk_untouched() {
    let fixture = seeded_fixture().await;
    let before = tree_snapshot(&fixture);
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = "--- a/app/src/screens/Other.tsx\n+++ b/app/src/screens/Other.tsx\n@@ -1,1 +1,1 @@\n-export const other = 1;\n+export const other = 2;\n";
    let scope = vec!["app/src/lib/training/**".to_string()];

    match ingestor.ingest(raw, Some(&scope)).await.unwrap_err() {
        PatchError::OutsideTargetScope { touched, allowed } => {
            assert_eq!(touched, vec!["app/src/screens/Other.tsx"]);
            assert_eq!(allowed, scope);
        }
        other => panic!("expected OutsideTargetScope, got {other:?}"),
    }

    assert_eq!(tree_snapshot(&fixture), before);
    assert!(fixture.status().await.is_empty());
}

#[tokio::test]
async fn diff_inside_target_scope_applies() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = "--- a/app/src/lib/training/engine.ts\n+++ b/app/src/lib/training/engine.ts\n@@ -1,1 +1,1 @@\n-export function train() {}\n+export function train(reps: number) {}\n";
    let scope = vec!["app/src/lib/training/**".to_string()];

    let applied = ingestor.ingest(raw, Some(&scope)).await.unwrap();
    assert_eq!(applied.touched, vec!["app/src/lib/training/engine.ts"]);
    assert!(std::fs::read_to_string(
        fixture.path().join("app/src/lib/training/engine.ts")
    )
    .unwrap()
    .contains("reps: number"));
}

#[tokio::test]
async fn new_file_created_inside_scope_is_allowed() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = concat!(
        "===FILE_START: app/src/lib/training/summary.ts===\n",
        "export function summarize() {}\n",
        "===FILE_END: app/src/lib/training/summary.ts===\n",
    );
    let scope = vec!["app/src/lib/training/**".to_string()];

    let applied = ingestor.ingest(raw, Some(&scope)).await.unwrap();
    assert_eq!(applied.touched, vec!["app/src/lib/training/summary.ts"]);
    assert!(fixture
        .path()
        .join("app/src/lib/training/summary.ts")
        .exists());
}

// =============================================================================
// Whole-file format end to end + rollback invariant
// =============================================================================

#[tokio::test]
async fn whole_file_block_is_detected_normalized_and_applied() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = concat!(
        "===FILE_START: app/src/foo.ts===\n",
        "export const x = 2;\n",
        "===FILE_END: app/src/foo.ts===\n",
    );

    let envelope = ingestor.prepare(raw).await.unwrap();
    assert_eq!(envelope.detected_format, PatchFormat::FileBlocks);
    let diff = envelope.normalized_diff.unwrap();
    assert!(diff.contains("-export const x = 1;"));
    assert!(diff.contains("+export const x = 2;"));

    let applied = ingestor.ingest(raw, None).await.unwrap();
    assert_eq!(applied.touched, vec!["app/src/foo.ts"]);
    assert_eq!(
        std::fs::read_to_string(fixture.path().join("app/src/foo.ts")).unwrap(),
        "export const x = 2;\n"
    );
}

#[tokio::test]
async fn failed_whole_file_ingestion_leaves_zero_residue() {
    let fixture = seeded_fixture().await;
    let before = tree_snapshot(&fixture);
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    // Normalization succeeds, then the scope check rejects; every byte the
    // materialization touched must be back.
    let raw = concat!(
        "===FILE_START: app/src/foo.ts===\n",
        "export const x = 99;\n",
        "===FILE_END: app/src/foo.ts===\n",
    );
    let scope = vec!["app/src/lib/training/**".to_string()];
    let err = ingestor.ingest(raw, Some(&scope)).await.unwrap_err();
    assert!(matches!(err, PatchError::OutsideTargetScope { .. }));

    assert_eq!(tree_snapshot(&fixture), before);
    assert!(fixture.status().await.is_empty());
    assert!(!fixture.path().join("app/src/foo.ts.agent-backup").exists());
}

#[tokio::test]
async fn identical_content_block_is_empty_diff_and_leaves_zero_residue() {
    let fixture = seeded_fixture().await;
    let before = tree_snapshot(&fixture);
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = concat!(
        "===FILE_START: app/src/foo.ts===\n",
        "export const x = 1;\n",
        "===FILE_END: app/src/foo.ts===\n",
    );
    let err = ingestor.ingest(raw, None).await.unwrap_err();
    assert!(matches!(err, PatchError::EmptyDiffAfterNormalization));

    assert_eq!(tree_snapshot(&fixture), before);
    assert!(fixture.status().await.is_empty());
    assert!(!fixture.path().join("app/src/foo.ts.agent-backup").exists());
}

#[tokio::test]
async fn unified_diff_detection_falls_back_after_blocks() {
    let fixture = seeded_fixture().await;
    let git = fixture.workspace();
    let ingestor = PatchIngestor::new(&git);

    let raw = "--- a/app/src/foo.ts\n+++ b/app/src/foo.ts\n@@ -1,1 +1,1 @@\n-export const x = 1;\n+export const x = 2;\n";
    let envelope = ingestor.prepare(raw).await.unwrap();
    assert_eq!(envelope.detected_format, PatchFormat::UnifiedDiff);

    let unknown = ingestor.prepare("nothing patch-like here").await.unwrap();
    assert_eq!(unknown.detected_format, PatchFormat::Unknown);
    assert!(unknown.normalized_diff.is_none());
}
