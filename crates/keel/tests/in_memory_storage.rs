//! Integration tests for the memory storage backend.
//!
//! These tests go through the public `IssueStorage` port only: CRUD,
//! dependency management and cycle rejection, transactions, hierarchical
//! IDs and the data-quality queries built on top of the store.

use keel::consistency::find_duplicates;
use keel::domain::{
    DependencyType, IssueFilter, IssueId, IssueStatus, IssueType, IssueUpdate, NewIssue,
};
use keel::error::{Error, ErrorKind, Result};
use keel::graph::GraphSettings;
use keel::id_generation::IdGeneratorConfig;
use keel::storage::{BackendOptions, BackendRegistry, IssueStorage, MemoryStorage, Transaction};
use rstest::rstest;
use std::collections::HashSet;

fn sequential() -> MemoryStorage {
    MemoryStorage::new(IdGeneratorConfig::new("kl").sequential())
}

fn blocked_by(title: &str, blocker: &IssueId) -> NewIssue {
    NewIssue {
        dependencies: vec![(blocker.clone(), DependencyType::Blocks)],
        ..NewIssue::titled(title)
    }
}

// ========== Basic CRUD Tests ==========

#[tokio::test]
async fn test_create_and_get() {
    let mut storage = MemoryStorage::new(IdGeneratorConfig::new("kl"));

    let issue = storage.create(NewIssue::titled("Fix login")).await.unwrap();

    assert!(issue.id.as_str().starts_with("kl-"));
    assert_eq!(issue.status, IssueStatus::Open);
    assert_eq!(issue.priority, 2);

    let loaded = storage.get(&issue.id).await.unwrap().unwrap();
    assert_eq!(loaded.title, "Fix login");
    assert!(storage.get(&IssueId::new("kl-missing")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_rejects_invalid_input() {
    let mut storage = sequential();

    let err = storage
        .create(NewIssue {
            priority: 9,
            ..NewIssue::titled("Too urgent")
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let err = storage.create(NewIssue::titled("")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(storage.statistics().await.unwrap().total_issues, 0);
}

#[tokio::test]
async fn test_update_close_and_reopen() {
    let mut storage = sequential();
    let issue = storage.create(NewIssue::titled("Refactor")).await.unwrap();

    let closed = storage
        .update(&issue.id, IssueUpdate::status(IssueStatus::Closed))
        .await
        .unwrap();
    assert!(closed.closed_at.is_some());

    let reopened = storage
        .update(&issue.id, IssueUpdate::status(IssueStatus::Open))
        .await
        .unwrap();
    assert!(reopened.closed_at.is_none());
    assert!(reopened.updated_at >= closed.updated_at);

    let err = storage
        .update(&IssueId::new("kl-404"), IssueUpdate::status(IssueStatus::Closed))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IssueNotFound(_)));
}

#[tokio::test]
async fn test_unknown_custom_status_is_rejected() {
    let mut storage = sequential();
    let issue = storage.create(NewIssue::titled("Review")).await.unwrap();

    let err = storage
        .update(&issue.id, IssueUpdate::status(IssueStatus::from("in_review".to_string())))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn test_list_filters_and_hides_tombstones() {
    let mut storage = sequential();
    let bug = storage
        .create(NewIssue {
            issue_type: IssueType::Bug,
            priority: 0,
            ..NewIssue::titled("Crash on start")
        })
        .await
        .unwrap();
    let task = storage.create(NewIssue::titled("Write docs")).await.unwrap();
    storage
        .tombstone(&task.id, chrono::Utc::now(), Some("obsolete".to_string()))
        .await
        .unwrap();

    let all = storage.list(&IssueFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, bug.id);

    let tombstones = storage
        .list(&IssueFilter {
            status: Some(IssueStatus::Tombstone),
            ..IssueFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(storage.export_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_labels_and_comments() {
    let mut storage = sequential();
    let issue = storage.create(NewIssue::titled("Label me")).await.unwrap();

    storage.add_label(&issue.id, "backend").await.unwrap();
    let labelled = storage.add_label(&issue.id, "backend").await.unwrap();
    assert_eq!(labelled.labels, vec!["backend".to_string()]);

    storage.add_comment(&issue.id, "sam", "first").await.unwrap();
    storage.add_comment(&issue.id, "alex", "second").await.unwrap();
    let comments = storage.get_comments(&issue.id).await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].text, "first");

    let unlabelled = storage.remove_label(&issue.id, "backend").await.unwrap();
    assert!(unlabelled.labels.is_empty());
}

// ========== Dependencies ==========

#[tokio::test]
async fn test_cycle_is_rejected() {
    let mut storage = sequential();
    let a = storage.create(NewIssue::titled("A")).await.unwrap();
    let b = storage.create(blocked_by("B", &a.id)).await.unwrap();
    let c = storage.create(blocked_by("C", &b.id)).await.unwrap();

    let err = storage
        .add_dependency(&a.id, &c.id, DependencyType::Blocks)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircularDependency { .. }));

    // Non-blocking edges may point backwards.
    storage
        .add_dependency(&a.id, &c.id, DependencyType::Related)
        .await
        .unwrap();
    assert_eq!(storage.get_dependents(&c.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_edge_is_conflict() {
    let mut storage = sequential();
    let a = storage.create(NewIssue::titled("A")).await.unwrap();
    let b = storage.create(blocked_by("B", &a.id)).await.unwrap();

    let err = storage
        .add_dependency(&b.id, &a.id, DependencyType::Related)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    storage.remove_dependency(&b.id, &a.id).await.unwrap();
    assert!(storage.get_dependencies(&b.id).await.unwrap().is_empty());
    assert!(storage.remove_dependency(&b.id, &a.id).await.is_err());
}

#[tokio::test]
async fn test_ready_and_blocked_work() {
    let mut storage = sequential();
    let blocker = storage.create(NewIssue::titled("Blocker")).await.unwrap();
    let waiting = storage.create(blocked_by("Waiting", &blocker.id)).await.unwrap();

    let graph = storage.graph_snapshot(GraphSettings::default()).await.unwrap();
    let ready: Vec<IssueId> = graph
        .ready_work(&IssueFilter::default(), Default::default())
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ready, vec![blocker.id.clone()]);
    let blocked = graph.blocked_work(&IssueFilter::default());
    assert_eq!(blocked[0].issue.id, waiting.id);
    assert_eq!(blocked[0].open_blockers, vec![blocker.id.clone()]);

    storage
        .update(&blocker.id, IssueUpdate::status(IssueStatus::Closed))
        .await
        .unwrap();
    let graph = storage.graph_snapshot(GraphSettings::default()).await.unwrap();
    let ready = graph.ready_work(&IssueFilter::default(), Default::default());
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, waiting.id);
}

#[tokio::test]
async fn test_purge_leaves_orphaned_edges() {
    let mut storage = sequential();
    let target = storage.create(NewIssue::titled("Target")).await.unwrap();
    let source = storage
        .create(NewIssue {
            dependencies: vec![(target.id.clone(), DependencyType::Related)],
            ..NewIssue::titled("Source")
        })
        .await
        .unwrap();

    storage.purge(&target.id).await.unwrap();

    let graph = storage.graph_snapshot(GraphSettings::default()).await.unwrap();
    let orphans = graph.orphaned_dependencies();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].issue_id, source.id);
    assert_eq!(orphans[0].depends_on_id, target.id);
}

// ========== Transactions ==========

#[tokio::test]
async fn test_transaction_commits_on_ok() {
    let mut storage = sequential();

    storage
        .run_in_transaction(Box::new(|tx: &mut dyn Transaction| -> Result<()> {
            let epic = tx.create(NewIssue {
                issue_type: IssueType::Epic,
                ..NewIssue::titled("Epic")
            })?;
            tx.create(NewIssue {
                parent: Some(epic.id.clone()),
                ..NewIssue::titled("Child")
            })?;
            tx.set_metadata("batch", "done");
            Ok(())
        }))
        .await
        .unwrap();

    assert_eq!(storage.statistics().await.unwrap().total_issues, 2);
    assert!(storage.get(&IssueId::new("kl-1.1")).await.unwrap().is_some());
    assert_eq!(
        storage.get_metadata("batch").await.unwrap().as_deref(),
        Some("done")
    );
}

#[tokio::test]
async fn test_transaction_rolls_back_on_err() {
    let mut storage = sequential();
    let existing = storage.create(NewIssue::titled("Existing")).await.unwrap();
    let id = existing.id.clone();

    let err = storage
        .run_in_transaction(Box::new(move |tx: &mut dyn Transaction| -> Result<()> {
            tx.create(NewIssue::titled("Staged"))?;
            tx.update(&id, IssueUpdate::status(IssueStatus::Closed))?;
            Err(Error::Validation("abort".to_string()))
        }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);

    assert_eq!(storage.statistics().await.unwrap().total_issues, 1);
    let unchanged = storage.get(&existing.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, IssueStatus::Open);
}

// ========== ID Allocation ==========

#[tokio::test]
async fn test_hash_ids_are_unique() {
    let mut storage = MemoryStorage::new(IdGeneratorConfig::new("kl"));
    let mut seen = HashSet::new();

    for _ in 0..200 {
        let issue = storage.create(NewIssue::titled("Same title")).await.unwrap();
        assert!(seen.insert(issue.id), "IDs must never repeat");
    }
}

#[tokio::test]
async fn test_child_ids_and_depth_limit() {
    let mut storage = sequential();
    let root = storage.create(NewIssue::titled("Root")).await.unwrap();

    let first = storage
        .create(NewIssue {
            parent: Some(root.id.clone()),
            ..NewIssue::titled("First")
        })
        .await
        .unwrap();
    let second = storage
        .create(NewIssue {
            parent: Some(root.id.clone()),
            ..NewIssue::titled("Second")
        })
        .await
        .unwrap();
    assert_eq!(first.id.as_str(), "kl-1.1");
    assert_eq!(second.id.as_str(), "kl-1.2");
    assert!(
        first
            .dependencies
            .iter()
            .any(|d| d.depends_on_id == root.id && d.dep_type == DependencyType::ParentChild)
    );

    let mut parent = first.id;
    for expected in ["kl-1.1.1", "kl-1.1.1.1"] {
        let child = storage
            .create(NewIssue {
                parent: Some(parent.clone()),
                ..NewIssue::titled("Deeper")
            })
            .await
            .unwrap();
        assert_eq!(child.id.as_str(), expected);
        parent = child.id;
    }

    let err = storage
        .create(NewIssue {
            parent: Some(parent),
            ..NewIssue::titled("Too deep")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DepthExceeded { .. }));
}

#[tokio::test]
async fn test_unknown_parent_is_not_found() {
    let mut storage = sequential();
    let err = storage
        .create(NewIssue {
            parent: Some(IssueId::new("kl-77")),
            ..NewIssue::titled("Orphan")
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_rename_prefix_rewrites_edges() {
    let mut storage = sequential();
    let a = storage.create(NewIssue::titled("A")).await.unwrap();
    storage.create(blocked_by("B", &a.id)).await.unwrap();

    let renamed = storage.rename_prefix("kl", "core").await.unwrap();
    assert_eq!(renamed, 2);

    let b = storage.get(&IssueId::new("core-2")).await.unwrap().unwrap();
    assert_eq!(b.dependencies[0].depends_on_id, IssueId::new("core-1"));
    let next = storage.create(NewIssue::titled("C")).await.unwrap();
    assert_eq!(next.id.as_str(), "core-3");
}

// ========== Duplicates ==========

#[rstest]
#[case(IssueStatus::Open, 1)]
#[case(IssueStatus::Closed, 0)]
#[tokio::test]
async fn test_duplicates_ignore_terminal_issues(
    #[case] status: IssueStatus,
    #[case] expected_groups: usize,
) {
    let mut storage = sequential();
    for _ in 0..3 {
        let issue = storage.create(NewIssue::titled("Flaky test")).await.unwrap();
        storage
            .update(&issue.id, IssueUpdate::status(status.clone()))
            .await
            .unwrap();
    }
    storage.create(NewIssue::titled("Something else")).await.unwrap();

    let issues = storage.export_all().await.unwrap();
    let groups = find_duplicates(&issues);

    assert_eq!(groups.len(), expected_groups);
    if let Some(group) = groups.first() {
        assert_eq!(group.canonical.as_str(), "kl-1");
        assert_eq!(group.extras(), 2);
    }
}

// ========== Registry ==========

#[tokio::test]
async fn test_registry_opens_memory_backend() {
    let registry = BackendRegistry::with_defaults();
    let mut storage = registry
        .open("memory", BackendOptions::new(IdGeneratorConfig::new("kl")))
        .await
        .unwrap();

    storage.create(NewIssue::titled("Via registry")).await.unwrap();
    assert!(!storage.capabilities().persistent);
    assert!(storage.federation().is_none());

    let err = registry
        .open("postgres", BackendOptions::new(IdGeneratorConfig::new("kl")))
        .await
        .err()
        .expect("expected an error");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_cloned_handles_share_state() {
    let mut writer = sequential();
    let reader = writer.clone();

    let issue = writer.create(NewIssue::titled("Shared")).await.unwrap();

    let (a, b) = tokio::join!(reader.get(&issue.id), reader.statistics());
    assert!(a.unwrap().is_some());
    assert_eq!(b.unwrap().total_issues, 1);
}
