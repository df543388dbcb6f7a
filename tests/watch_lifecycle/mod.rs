use watchable_kv::Error;

use crate::commons::decode;
use crate::commons::new_store;
use crate::commons::within;
use crate::commons::Placement;

#[tokio::test]
async fn test_watchers_follow_placement_updates() {
    let (store, backend) = new_store();
    store.set("placement", &Placement::new("a", 4)).await.unwrap();

    let mut first = store.watch("placement").await.unwrap();
    let mut second = store.watch("placement").await.unwrap();

    for w in [&mut first, &mut second] {
        assert!(within(w.changed()).await);
        assert_eq!(decode(w.current()), (Placement::new("a", 4), 1));
    }

    store.set("placement", &Placement::new("b", 8)).await.unwrap();
    for w in [&mut first, &mut second] {
        assert!(within(w.changed()).await);
        assert_eq!(decode(w.current()), (Placement::new("b", 8), 2));
    }

    assert_eq!(backend.subscriber_count("/it/placement"), 1);
    assert_eq!(store.cached("placement").map(|v| v.version()), Some(2));
}

#[tokio::test]
async fn test_last_handle_releases_subscription() {
    let (store, backend) = new_store();

    let first = store.watch("placement").await.unwrap();
    let second = store.watch("placement").await.unwrap();
    within(async {
        while backend.subscriber_count("/it/placement") == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;

    drop(first);
    assert_eq!(store.watchable_count(), 1);

    drop(second);
    assert_eq!(store.watchable_count(), 0);
    within(async {
        while backend.subscriber_count("/it/placement") != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn test_store_close_ends_every_watch() {
    let (store, _backend) = new_store();
    let mut handles = Vec::new();
    for key in ["a", "b", "c"] {
        handles.push(store.watch(key).await.unwrap());
    }
    assert_eq!(store.watchable_count(), 3);

    store.close().await;

    for mut w in handles {
        assert!(!within(w.changed()).await);
    }
    assert!(matches!(store.watch("a").await, Err(Error::StoreClosed)));
}
