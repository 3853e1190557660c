use std::sync::Arc;
use std::time::Duration;

use cafe_query::prelude::*;
use cafe_query::test::ScriptedFetcher;

type Client = QueryClient<String, String>;
type Scripted = ScriptedFetcher<String, String>;

const FIVE_MINUTES: Duration = Duration::from_secs(300);

fn data(entry: &CacheEntry<String, String>) -> Option<&str> {
    entry.data().map(|d| d.as_str())
}

// Lets spawned fetch tasks run up to their next suspension point.
async fn let_tasks_run() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_observers_share_a_single_fetch() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    let gate = fetcher.push_gated(Ok("categories".to_string()));
    let key = query_key!["categories"];
    let options = QueryOptions::fresh_for(FIVE_MINUTES);

    let first = client.watch_shared(key.clone(), fetcher.clone(), options);
    let second = client.watch_shared(key.clone(), fetcher.clone(), options);

    assert!(first.state().is_loading());
    assert_eq!(client.store().subscriber_count(&key), 2);

    gate.send(()).unwrap();
    let state = first.settled().await;

    assert_eq!(data(&state), Some("categories"));
    assert_eq!(second.state().status(), QueryStatus::Success);
    assert_eq!(fetcher.calls(), 1);
    let stats = client.stats();
    assert_eq!(stats.issued, 1);
    assert_eq!(stats.joined, 1);
    assert!((stats.dedup_ratio() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn fresh_data_is_served_without_fetching() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    fetcher.push_ok("v1".to_string());
    let key = query_key!["categories"];
    let options = QueryOptions::fresh_for(FIVE_MINUTES);

    let observer = client.watch_shared(key.clone(), fetcher.clone(), options);
    observer.settled().await;
    observer.unmount();

    tokio::time::advance(Duration::from_secs(60)).await;

    let observer = client.watch_shared(key.clone(), fetcher.clone(), options);
    let state = observer.state();
    assert_eq!(data(&state), Some("v1"));
    assert!(!state.is_fetching());
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(client.stats().cache_hits, 1);

    let value = client.fetch_query_shared(&key, fetcher.clone(), options).await.unwrap();
    assert_eq!(value.as_str(), "v1");
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_data_is_shown_while_revalidating() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    fetcher.push_ok("v1".to_string());
    let key = query_key!["posts", "featured"];
    let options = QueryOptions::fresh_for(Duration::from_secs(180));

    client.watch_shared(key.clone(), fetcher.clone(), options).settled().await;
    tokio::time::advance(Duration::from_secs(181)).await;

    let gate = fetcher.push_gated(Ok("v2".to_string()));
    let mut observer = client.watch_shared(key.clone(), fetcher.clone(), options);
    let state = observer.state();
    assert!(state.is_fetching());
    assert!(!state.is_loading());
    assert_eq!(data(&state), Some("v1"));

    gate.send(()).unwrap();
    assert!(observer.changed().await);
    let state = observer.settled().await;
    assert_eq!(data(&state), Some("v2"));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_keeps_earlier_data() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    fetcher.push_ok("menu".to_string());
    fetcher.push_err("HTTP 500".to_string());
    let key = query_key!["posts", 3];

    let observer = client.watch_shared(key.clone(), fetcher.clone(), QueryOptions::fresh_for(FIVE_MINUTES));
    observer.settled().await;
    let state = observer.refetch().await;

    assert_eq!(state.status(), QueryStatus::Error);
    assert_eq!(state.error().map(String::as_str), Some("HTTP 500"));
    assert_eq!(data(&state), Some("menu"));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidation_refetches_only_subscribed_keys_once() {
    let client = Client::new();
    let watched = Arc::new(Scripted::repeating(|call| Ok(format!("page {call}"))));
    let unwatched = Arc::new(Scripted::repeating(|call| Ok(format!("featured {call}"))));
    let page = query_key!["posts"].with_params([("category_id", Some(5u64))]);
    let featured = query_key!["posts", "featured"];
    let options = QueryOptions::fresh_for(FIVE_MINUTES);

    let observer = client.watch_shared(page.clone(), watched.clone(), options);
    observer.settled().await;
    client.fetch_query_shared(&featured, unwatched.clone(), options).await.unwrap();

    let matched = client.invalidate(&[KeyFilter::prefix(query_key!["posts"]), KeyFilter::exact(page.clone())]);
    assert_eq!(matched.len(), 2);

    let state = observer.settled().await;
    assert_eq!(data(&state), Some("page 1"));
    assert_eq!(watched.calls(), 2);

    let_tasks_run().await;
    assert_eq!(unwatched.calls(), 1);
    let featured_entry = client.store().get(&featured).unwrap();
    assert!(featured_entry.is_invalidated());
    assert_eq!(data(&featured_entry), Some("featured 0"));
}

#[tokio::test(start_paused = true)]
async fn only_the_last_issued_fetch_settles_the_entry() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    let old = fetcher.push_gated(Ok("old".to_string()));
    let new = fetcher.push_gated(Ok("new".to_string()));
    let key = query_key!["posts", "low-stock"];

    let observer = client.watch_shared(key.clone(), fetcher.clone(), QueryOptions::new());
    client.invalidate(&[KeyFilter::exact(key.clone())]);
    let_tasks_run().await;
    assert_eq!(fetcher.calls(), 2);

    new.send(()).unwrap();
    let state = observer.settled().await;
    assert_eq!(data(&state), Some("new"));

    old.send(()).unwrap();
    let_tasks_run().await;
    assert_eq!(data(&observer.state()), Some("new"));
    assert_eq!(client.stats().discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn waiter_on_a_superseded_fetch_gets_the_newer_result() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    let old = fetcher.push_gated(Ok("old".to_string()));
    fetcher.push_ok("new".to_string());
    let key = query_key!["categories", 9];
    let options = QueryOptions::new();

    let _observer = client.watch_shared(key.clone(), fetcher.clone(), options);
    let (value, _) = tokio::join!(client.fetch_query_shared(&key, fetcher.clone(), options), async {
        let_tasks_run().await;
        client.invalidate(&[KeyFilter::exact(key.clone())]);
        let_tasks_run().await;
        old.send(()).unwrap();
    });

    assert_eq!(value.unwrap().as_str(), "new");
}

#[tokio::test(start_paused = true)]
async fn disabled_query_neither_subscribes_nor_fetches() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    let key = query_key!["posts", 0];
    let options = QueryOptions::new().enabled_if(false);

    let observer = client.watch_shared(key.clone(), fetcher.clone(), options);
    let_tasks_run().await;

    assert!(!observer.is_enabled());
    assert_eq!(observer.state().status(), QueryStatus::Idle);
    assert_eq!(observer.refetch().await.status(), QueryStatus::Idle);
    assert!(!client.store().contains(&key));
    assert_eq!(fetcher.calls(), 0);

    let err = client.fetch_query_shared(&key, fetcher.clone(), options).await.unwrap_err();
    assert!(matches!(err, QueryError::Disabled(k) if k == key));
}

#[tokio::test(start_paused = true)]
async fn fetch_completes_after_its_subscribers_left() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    let gate = fetcher.push_gated(Ok("orphan".to_string()));
    let key = query_key!["posts", "price-range", "2", "5"];

    let observer = client.watch_shared(key.clone(), fetcher.clone(), QueryOptions::new());
    let_tasks_run().await;
    observer.unmount();
    assert_eq!(client.store().subscriber_count(&key), 0);

    gate.send(()).unwrap();
    let_tasks_run().await;

    let entry = client.store().get(&key).unwrap();
    assert_eq!(data(&entry), Some("orphan"));
    assert!(entry.is_success());
}

#[tokio::test(start_paused = true)]
async fn clear_discards_results_in_flight() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::new());
    let gate = fetcher.push_gated(Ok("private".to_string()));
    let key = query_key!["user"];

    let observer = client.watch_shared(key.clone(), fetcher.clone(), QueryOptions::new());
    let_tasks_run().await;
    client.clear();

    gate.send(()).unwrap();
    let_tasks_run().await;

    assert!(client.store().is_empty());
    assert_eq!(observer.state().status(), QueryStatus::Idle);
    assert_eq!(client.stats().discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetch_queries_are_deduplicated() {
    let client = Client::new();
    let fetcher = Arc::new(Scripted::repeating(|_| Ok("shared".to_string())));
    let key = query_key!["posts", "category", 2];
    let options = QueryOptions::fresh_for(FIVE_MINUTES);

    let (a, b) = tokio::join!(
        client.fetch_query_shared(&key, fetcher.clone(), options),
        client.fetch_query_shared(&key, fetcher.clone(), options),
    );

    assert_eq!(a.unwrap().as_str(), "shared");
    assert_eq!(b.unwrap().as_str(), "shared");
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn closures_work_as_fetchers() {
    let client = Client::new();
    let key = query_key!["greeting"];

    let value = client
        .fetch_query(&key, |key: QueryKey| async move { Ok::<_, String>(format!("hello from {key}")) }, QueryOptions::new())
        .await
        .unwrap();

    assert_eq!(value.as_str(), r#"hello from ["greeting"]"#);
}

#[tokio::test(start_paused = true)]
async fn query_data_can_be_written_and_read_directly() {
    let client = Client::new();
    let key = query_key!["posts", 11];
    let fetcher = Arc::new(Scripted::new());

    client.set_query_data(&key, "seeded".to_string());
    assert_eq!(client.get_query_data(&key).as_deref().map(String::as_str), Some("seeded"));

    let observer = client.watch_shared(key.clone(), fetcher.clone(), QueryOptions::fresh_for(FIVE_MINUTES));
    assert_eq!(data(&observer.state()), Some("seeded"));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn gc_task_evicts_entries_past_retention() {
    let client = Client::new();
    let key = query_key!["posts", "featured"];
    let options = QueryOptions::new().retained_for(Duration::from_secs(30));

    client
        .fetch_query(&key, |_: QueryKey| async { Ok::<_, String>("short lived".to_string()) }, options)
        .await
        .unwrap();
    let gc = client.spawn_gc(Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(client.store().contains(&key));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!client.store().contains(&key));

    gc.abort();
}

#[tokio::test(start_paused = true)]
async fn panicking_fetcher_releases_the_key() {
    let client = Client::new();
    let key = query_key!["posts", "featured"];
    let options = QueryOptions::new().retained_for(Duration::from_secs(30));

    // Nothing scripted: the first call panics.
    let broken = Arc::new(Scripted::new());
    let observer = client.watch_shared(key.clone(), broken.clone(), options);
    let state = tokio::time::timeout(Duration::from_secs(2), observer.settled()).await.unwrap();

    assert_eq!(state.status(), QueryStatus::Idle);
    assert!(!state.is_fetching());
    assert_eq!(broken.calls(), 1);
    assert_eq!(client.stats().abandoned, 1);

    let err = client.fetch_query_shared(&key, Arc::new(Scripted::new()), options).await.unwrap_err();
    assert!(matches!(err, QueryError::Abandoned(k) if k == key));

    let healthy = Arc::new(Scripted::new());
    healthy.push_ok("featured".to_string());
    let value = tokio::time::timeout(Duration::from_secs(2), client.fetch_query_shared(&key, healthy.clone(), options))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.as_str(), "featured");
    assert_eq!(data(&observer.state()), Some("featured"));

    observer.unmount();
    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(client.store().evict_unused(), 1);
    assert!(!client.store().contains(&key));
}

#[tokio::test(start_paused = true)]
async fn panic_during_revalidation_keeps_the_data_and_marks_it_stale() {
    let client = Client::new();
    let key = query_key!["categories"];
    client.set_query_data(&key, "cached".to_string());

    let broken = Arc::new(Scripted::new());
    let observer = client.watch_shared(key.clone(), broken.clone(), QueryOptions::new());
    let state = observer.settled().await;

    assert_eq!(broken.calls(), 1);
    assert!(state.is_success());
    assert_eq!(data(&state), Some("cached"));
    assert!(state.is_stale());

    // Marked stale even under a long freshness window, so the next read fetches again.
    let healthy = Arc::new(Scripted::new());
    healthy.push_ok("refreshed".to_string());
    let value = client
        .fetch_query_shared(&key, healthy.clone(), QueryOptions::fresh_for(FIVE_MINUTES))
        .await
        .unwrap();
    assert_eq!(value.as_str(), "refreshed");
    assert_eq!(healthy.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn rereading_an_unwatched_entry_restarts_its_retention() {
    let client = Client::new();
    let key = query_key!["posts", "low-stock"];
    let options = QueryOptions::new().retained_for(Duration::from_secs(30));
    let fetcher = Arc::new(Scripted::repeating(|call| Ok(format!("low stock #{call}"))));

    client.fetch_query_shared(&key, fetcher.clone(), options).await.unwrap();

    tokio::time::advance(Duration::from_secs(20)).await;
    let value = client.fetch_query_shared(&key, fetcher.clone(), options).await.unwrap();
    assert_eq!(value.as_str(), "low stock #1");

    // 40s after the first read but only 20s after the last one.
    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(client.store().evict_unused(), 0);
    assert!(client.store().contains(&key));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(client.store().evict_unused(), 1);
    assert_eq!(fetcher.calls(), 2);
}
