//! Soft delete, expiry classification and pruning against a real export file.

use chrono::{DateTime, Duration, Utc};
use keel::consistency::{self, CheckerSettings};
use keel::domain::{IssueId, NewIssue};
use keel::id_generation::IdGeneratorConfig;
use keel::storage::{IssueStorage, MemoryStorage};
use keel::sync::{self, ImportOptions};
use keel::tombstone::{self, TombstonePolicy};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Store with one tombstone per age in `ages` (days), plus one live issue.
async fn aged_store(now: DateTime<Utc>, ages: &[i64]) -> (MemoryStorage, BTreeMap<i64, IssueId>) {
    let mut storage = MemoryStorage::new(IdGeneratorConfig::new("kl").sequential());
    let mut by_age = BTreeMap::new();
    for &days in ages {
        let issue = storage
            .create(NewIssue::titled(format!("Deleted {days} days ago")))
            .await
            .unwrap();
        storage
            .tombstone(&issue.id, now - Duration::days(days), None)
            .await
            .unwrap();
        by_age.insert(days, issue.id);
    }
    storage.create(NewIssue::titled("Still here")).await.unwrap();
    (storage, by_age)
}

#[tokio::test]
async fn test_summary_groups_by_age() {
    let now = Utc::now();
    let (storage, ids) = aged_store(now, &[31, 29, 23, 20]).await;

    let summary = tombstone::summarize(&storage, &TombstonePolicy::default(), now)
        .await
        .unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.expired, vec![ids[&31].clone()]);
    assert_eq!(summary.expiring_soon.len(), 2);
    assert!(summary.expiring_soon.contains(&ids[&29]));
    assert!(summary.expiring_soon.contains(&ids[&23]));
}

#[tokio::test]
async fn test_custom_policy_shifts_the_window() {
    let now = Utc::now();
    let (storage, ids) = aged_store(now, &[31, 20, 10]).await;

    let summary = tombstone::summarize(&storage, &TombstonePolicy::from_days(14, 5), now)
        .await
        .unwrap();

    assert_eq!(summary.expired.len(), 2);
    assert!(summary.expired.contains(&ids[&20]));
    assert_eq!(summary.expiring_soon, vec![ids[&10].clone()]);
}

#[tokio::test]
async fn test_export_skips_expired_tombstones() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("issues.jsonl");
    let now = Utc::now();
    let (mut storage, ids) = aged_store(now, &[31, 29]).await;

    let report = sync::export(&mut storage, &path, TombstonePolicy::default().ttl)
        .await
        .unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(report.skipped_expired, 1);
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(!content.contains(&format!("\"{}\"", ids[&31])));
    assert!(content.contains(&format!("\"{}\"", ids[&29])));
}

#[tokio::test]
async fn test_prune_removes_expired_from_store_and_export() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("issues.jsonl");
    let now = Utc::now();
    let (mut storage, ids) = aged_store(now, &[31, 29, 23, 20]).await;

    // Keep every tombstone in the export so pruning has lines to drop.
    sync::export(&mut storage, &path, Duration::days(365))
        .await
        .unwrap();

    let ttl = TombstonePolicy::default().ttl;
    let report = tombstone::prune(&mut storage, Some(&path), ttl, now)
        .await
        .unwrap();

    assert_eq!(report.pruned, vec![ids[&31].clone()]);
    assert_eq!(report.export_lines_removed, 1);
    assert_eq!(report.count(), 1);
    assert!(storage.get(&ids[&31]).await.unwrap().is_none());
    for days in [29, 23, 20] {
        assert!(storage.get(&ids[&days]).await.unwrap().unwrap().is_tombstone());
    }

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 4);
    assert!(!content.contains(&format!("\"{}\"", ids[&31])));

    let divergence = consistency::compare(&storage, &path, &CheckerSettings::default()).await;
    assert!(!divergence.count_mismatch, "{divergence:?}");
    assert_eq!(divergence.content.map(|c| c.mismatched), Some(0));
}

#[tokio::test]
async fn test_prune_without_export_file() {
    let now = Utc::now();
    let (mut storage, ids) = aged_store(now, &[45]).await;

    let report = tombstone::prune(&mut storage, None, Duration::days(30), now)
        .await
        .unwrap();

    assert_eq!(report.pruned, vec![ids[&45].clone()]);
    assert_eq!(report.export_lines_removed, 0);
}

#[tokio::test]
async fn test_soft_deleted_issue_survives_reimport() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("issues.jsonl");
    let mut storage = MemoryStorage::new(IdGeneratorConfig::new("kl").sequential());
    let issue = storage.create(NewIssue::titled("Obsolete")).await.unwrap();
    sync::export(&mut storage, &path, Duration::days(30))
        .await
        .unwrap();

    let deleted = tombstone::soft_delete(&mut storage, &issue.id, Some("obsolete".to_string()))
        .await
        .unwrap();
    assert_eq!(deleted.delete_reason.as_deref(), Some("obsolete"));

    // The export still carries the live record.
    let report = sync::import(&mut storage, &path, &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.kept_tombstoned, 1);
    assert!(storage.get(&issue.id).await.unwrap().unwrap().is_tombstone());

    let summary = tombstone::summarize(&storage, &TombstonePolicy::default(), Utc::now())
        .await
        .unwrap();
    assert_eq!(summary.total, 1);
    assert!(summary.expired.is_empty());
}

#[tokio::test]
async fn test_tombstoning_twice_keeps_first_deletion_time() {
    let now = Utc::now();
    let (mut storage, ids) = aged_store(now, &[10]).await;

    let again = storage
        .tombstone(&ids[&10], now, Some("again".to_string()))
        .await
        .unwrap();

    assert_eq!(again.deleted_at, Some(now - Duration::days(10)));
}
