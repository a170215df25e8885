use std::sync::Arc;

use companion::{CompanionError, ConversationStore, Role};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prune_racing_first_message_never_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ConversationStore::open(dir.path().join("race.db"))
            .await
            .unwrap(),
    );

    for round in 0..10 {
        let thread_id = store.create_thread("New Chat").await.unwrap();

        let mut writers = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                store
                    .save_message(thread_id, Role::User, &format!("hi {}", i), None, None)
                    .await
            }));
        }
        let pruner = {
            let store = store.clone();
            tokio::spawn(async move { store.prune_empty_threads().await })
        };

        let mut saved = 0;
        for writer in writers {
            match writer.await.unwrap() {
                Ok(_) => saved += 1,
                Err(CompanionError::NotFound(_)) => {}
                Err(other) => panic!("round {}: unexpected error {:?}", round, other),
            }
        }
        let pruned = pruner.await.unwrap().unwrap();

        let exists = store.get_thread(thread_id).await.unwrap().is_some();
        let count = store.message_count(thread_id).await.unwrap();
        if exists {
            assert!(!pruned.contains(&thread_id));
            assert!(saved > 0);
            assert_eq!(count, saved);
        } else {
            assert!(pruned.contains(&thread_id));
            assert_eq!(saved, 0);
            assert_eq!(count, 0);
        }
    }
}

#[tokio::test]
async fn concurrent_writes_to_one_thread_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ConversationStore::open(dir.path().join("writes.db"))
            .await
            .unwrap(),
    );
    let thread_id = store.create_thread("busy").await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                store
                    .save_message(thread_id, role, &format!("message {}", i), None, None)
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let messages = store.get_messages(thread_id).await.unwrap();
    assert_eq!(messages.len(), 20);
    let mut ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
    let listed = ids.clone();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert!(listed.windows(2).all(|w| {
        let a = messages.iter().find(|m| m.id == w[0]).unwrap();
        let b = messages.iter().find(|m| m.id == w[1]).unwrap();
        (a.created_at.as_str(), a.id) < (b.created_at.as_str(), b.id)
    }));
}
