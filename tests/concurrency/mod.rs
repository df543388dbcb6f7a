use std::time::Duration;

use futures::future::join_all;
use watchable_kv::Error;

use crate::commons::decode;
use crate::commons::new_store;
use crate::commons::within;
use crate::commons::Placement;

/// Every writer retries check-and-set until it lands; no increment may be lost
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_modify_write_loses_no_updates() {
    let (store, _backend) = new_store();
    store
        .set_if_not_exists("counter", &Placement::new("init", 0))
        .await
        .unwrap();

    let writers = (0..8).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                loop {
                    let current = store.get("counter").await.unwrap();
                    let mut placement: Placement = current.unmarshal().unwrap();
                    placement.shards += 1;
                    placement.owner = format!("writer-{i}");

                    match store
                        .check_and_set("counter", current.version(), &placement)
                        .await
                    {
                        Ok(_) => break,
                        Err(e) if e.is_conditional_failure() => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }
        })
    });
    for result in join_all(writers).await {
        result.unwrap();
    }

    let (placement, version) = decode(Some(store.get("counter").await.unwrap()));
    assert_eq!(placement.shards, 80);
    assert_eq!(version, 81);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_watchers_converge_under_concurrent_writes() {
    let (store, _backend) = new_store();
    let mut w = store.watch("hot").await.unwrap();

    let writers = (0..4).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            for n in 0..25 {
                store.set("hot", &Placement::new(&format!("w{i}"), n)).await.unwrap();
            }
        })
    });
    for result in join_all(writers).await {
        result.unwrap();
    }

    let latest = store.get("hot").await.unwrap();
    assert_eq!(latest.version(), 100);

    within(async {
        let mut last = 0;
        loop {
            assert!(w.changed().await);
            let version = w.current().map(|v| v.version()).unwrap_or(0);
            assert!(version >= last);
            last = version;
            if version == 100 {
                break;
            }
        }
    })
    .await;
    assert_eq!(w.current(), Some(latest));
}

#[tokio::test]
async fn test_create_race_has_single_owner() {
    let (store, _backend) = new_store();

    let results = join_all((0..5).map(|i| {
        let store = store.clone();
        async move {
            store
                .set_if_not_exists("leader", &Placement::new(&format!("n{i}"), 1))
                .await
        }
    }))
    .await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::AlreadyExists)));
}

/// Handles on one key come and go while writes land; each close may tear the
/// Watchable down just as another task attaches to it
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_watch_churn_during_writes_keeps_one_watchable() {
    let (store, backend) = new_store();
    store.set("k", &Placement::new("init", 0)).await.unwrap();

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for n in 1..=200 {
                store.set("k", &Placement::new("writer", n)).await.unwrap();
                if n % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let churners = (0..16).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            for n in 0..300 {
                let w = store.watch("k").await.unwrap();
                assert!(store.watchable_count() <= 1);
                if (i + n) % 3 == 0 {
                    tokio::task::yield_now().await;
                }
                drop(w);
                assert!(store.watchable_count() <= 1);
            }
        })
    });
    for result in join_all(churners).await {
        result.unwrap();
    }
    writer.await.unwrap();

    assert_eq!(store.watchable_count(), 0);
    within(async {
        while backend.subscriber_count("/it/k") != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let latest = store.get("k").await.unwrap().version();
    assert_eq!(latest, 201);

    let mut a = store.watch("k").await.unwrap();
    let mut b = store.watch("k").await.unwrap();
    for w in [&mut a, &mut b] {
        within(async {
            while w.current().map(|v| v.version()) != Some(latest) {
                assert!(w.changed().await);
            }
        })
        .await;
    }
    assert_eq!(decode(a.current()), decode(b.current()));
    assert_eq!(store.watchable_count(), 1);
}
