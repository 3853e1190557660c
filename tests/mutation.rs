use std::sync::Arc;
use std::time::Duration;

use cafe_query::prelude::*;
use cafe_query::test::ScriptedFetcher;
use tokio::sync::Notify;

type Client = QueryClient<String, String>;

const FIVE_MINUTES: Duration = Duration::from_secs(300);

async fn let_tasks_run() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn seeded_client() -> (Client, Arc<ScriptedFetcher<String, String>>, QueryObserver<String, String>) {
    let client = Client::new();
    let fetcher: Arc<ScriptedFetcher<String, String>> =
        Arc::new(ScriptedFetcher::repeating(|call| Ok(format!("categories v{call}"))));
    let observer = client.watch_shared(query_key!["categories"], fetcher.clone(), QueryOptions::fresh_for(FIVE_MINUTES));
    (client, fetcher, observer)
}

#[tokio::test(start_paused = true)]
async fn success_invalidates_and_refetches_mounted_queries() {
    let (client, fetcher, observer) = seeded_client();
    observer.settled().await;
    client.set_query_data(&query_key!["categories", 4], "detail".to_string());

    let create = Mutation::new(client.clone(), |name: String| async move { Ok::<_, String>(format!("created {name}")) })
        .invalidating(vec![KeyFilter::prefix(query_key!["categories"])]);

    assert_eq!(create.status(), MutationStatus::Idle);
    let output = create.mutate("Tea".to_string()).await.unwrap();
    assert_eq!(output, "created Tea");

    let record = create.record();
    assert_eq!(record.status, MutationStatus::Success);
    assert_eq!(record.invalidated, vec![query_key!["categories"], query_key!["categories", 4]]);

    let state = observer.settled().await;
    assert_eq!(state.data().map(|d| d.as_str()), Some("categories v1"));
    assert_eq!(fetcher.calls(), 2);
    // Nobody watches the detail entry: it is only marked stale.
    assert!(client.store().get(&query_key!["categories", 4]).unwrap().is_invalidated());
}

#[tokio::test(start_paused = true)]
async fn failure_leaves_the_cache_alone() {
    let (client, fetcher, observer) = seeded_client();
    observer.settled().await;

    let delete = Mutation::new(client.clone(), |_id: u64| async { Err::<(), _>("HTTP 409".to_string()) })
        .invalidating(vec![KeyFilter::prefix(query_key!["categories"])]);

    let err = delete.mutate(3).await.unwrap_err();
    assert_eq!(err, "HTTP 409");
    assert_eq!(delete.status(), MutationStatus::Error);
    assert!(delete.record().invalidated.is_empty());

    let_tasks_run().await;
    assert_eq!(fetcher.calls(), 1);
    assert!(!client.store().get(&query_key!["categories"]).unwrap().is_invalidated());
}

#[tokio::test(start_paused = true)]
async fn failing_success_hook_fails_the_mutation() {
    let (client, fetcher, observer) = seeded_client();
    observer.settled().await;

    let login = Mutation::new(client.clone(), |_: ()| async { Ok::<_, String>(None::<String>) })
        .on_success(|_, _, token: &Option<String>| match token {
            Some(_) => Ok(()),
            None => Err("no token".to_string()),
        })
        .invalidating(vec![KeyFilter::prefix(query_key!["categories"])]);

    assert_eq!(login.mutate(()).await.unwrap_err(), "no token");
    assert_eq!(login.status(), MutationStatus::Error);
    let_tasks_run().await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn derived_filters_use_the_mutation_input() {
    let (client, _fetcher, observer) = seeded_client();
    observer.settled().await;
    client.set_query_data(&query_key!["categories", 4], "four".to_string());
    client.set_query_data(&query_key!["categories", 5], "five".to_string());

    let update = Mutation::new(client.clone(), |(id, name): (u64, String)| async move {
        Ok::<_, String>(format!("{id}: {name}"))
    })
    .invalidates(|(id, _), _| vec![KeyFilter::exact(query_key!["categories", *id])]);

    update.mutate((5, "Seasonal".to_string())).await.unwrap();

    assert_eq!(update.record().invalidated, vec![query_key!["categories", 5]]);
    assert!(client.store().get(&query_key!["categories", 5]).unwrap().is_invalidated());
    assert!(!client.store().get(&query_key!["categories", 4]).unwrap().is_invalidated());
}

#[tokio::test(start_paused = true)]
async fn status_is_pending_while_the_call_runs() {
    let client = Client::new();
    let proceed = Arc::new(Notify::new());
    let mutation = {
        let proceed = Arc::clone(&proceed);
        Mutation::new(client.clone(), move |_: ()| {
            let proceed = Arc::clone(&proceed);
            async move {
                proceed.notified().await;
                Ok::<_, String>(())
            }
        })
    };

    let (outcome, _) = tokio::join!(mutation.mutate(()), async {
        let_tasks_run().await;
        assert_eq!(mutation.status(), MutationStatus::Pending);
        proceed.notify_one();
    });

    outcome.unwrap();
    assert_eq!(mutation.status(), MutationStatus::Success);
    mutation.reset();
    assert_eq!(mutation.status(), MutationStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn one_shot_mutate_invalidates_on_success_only() {
    let (client, fetcher, observer) = seeded_client();
    observer.settled().await;
    let filters = [KeyFilter::exact(query_key!["categories"])];

    let failed: Result<(), String> = client.mutate(async { Err("nope".to_string()) }, &filters).await;
    assert!(failed.is_err());
    let_tasks_run().await;
    assert_eq!(fetcher.calls(), 1);

    let done: Result<u32, String> = client.mutate(async { Ok(7) }, &filters).await;
    assert_eq!(done.unwrap(), 7);
    observer.settled().await;
    assert_eq!(fetcher.calls(), 2);
}
