mod common;

use std::sync::Arc;

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_keep_the_newest_time() {
    let h = harness();
    h.cache.reload().await;
    let cache = Arc::new(h.cache);

    let mut tasks = Vec::new();
    for worker in 0..8_i64 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            for step in 0..50_i64 {
                let time = step * 8 + worker;
                cache.add_authorization(&api_grant(time), false).await;
                cache.add_user(&user_grant(time), true).await;
                assert!(cache
                    .get_authorization(API_KEY, RESOURCE, PERMISSION)
                    .is_some());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let entry = cache.get_authorization(API_KEY, RESOURCE, PERMISSION).unwrap();
    assert_eq!(entry.permission_time(RESOURCE, PERMISSION), Some(399));
    let user = cache.get_user(IAM_ID).unwrap();
    assert_eq!(user.permission_time(RESOURCE, PERMISSION), Some(399));
    assert_eq!(cache.stats().api_entries, 1);
    assert!(h.sink.errors().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_reload() {
    let writer = harness();
    writer.cache.reload().await;
    for n in 0..100 {
        let mut grant = api_grant(n);
        grant.api_key = format!("key-{n}");
        writer.cache.add_authorization(&grant, false).await;
    }

    let reader = Arc::new(harness_with(writer.index.clone(), envelope()));
    let reloading = {
        let reader = Arc::clone(&reader);
        tokio::spawn(async move { reader.cache.reload().await })
    };
    while !reloading.is_finished() {
        // Partial visibility is fine; a hit must always be complete.
        if let Some(entry) = reader.cache.get_authorization("key-0", RESOURCE, PERMISSION) {
            assert_eq!(entry.iam_id, IAM_ID);
        }
        tokio::task::yield_now().await;
    }

    let summary = reloading.await.unwrap();
    assert_eq!(summary.elements_applied, 100);
    assert_eq!(reader.cache.stats().api_entries, 100);
}
