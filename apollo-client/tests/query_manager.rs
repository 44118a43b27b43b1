use std::time::Duration;

use apollo_client::Client;
use apollo_client::Configuration;
use apollo_client::FetchPolicy;
use apollo_client::MockNetworkInterface;
use apollo_client::MutationOptions;
use apollo_client::NetworkStatus;
use apollo_client::Query;
use apollo_client::QueryOptions;
use apollo_client::WatchQueryOptions;
use apollo_client::error::ClientError;
use apollo_client::error::FetchError;
use apollo_client::json_ext::Object;
use apollo_client::json_ext::Value;
use futures::FutureExt;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;

const ME: &str = "query me { me { id name } }";
const NODE: &str = "query node($id: ID!) { node(id: $id) { id name } }";

fn object(value: Value) -> Object {
    value.as_object().cloned().unwrap_or_default()
}

fn client(network: &MockNetworkInterface) -> Client {
    client_with(network, Configuration::default())
}

fn client_with(network: &MockNetworkInterface, configuration: Configuration) -> Client {
    Client::builder()
        .network_interface(network.clone())
        .configuration(configuration)
        .build()
        .unwrap()
}

fn me(name: &str) -> Value {
    json!({"data": {"me": {"id": "1", "name": name, "__typename": "User"}}})
}

fn node(id: &str, name: &str) -> Value {
    json!({"data": {"node": {"id": id, "name": name, "__typename": "Node"}}})
}

fn watch(client: &Client, query: &str, variables: Value) -> apollo_client::ObservableQuery {
    client
        .watch_query(
            WatchQueryOptions::builder()
                .query(Query::parse(query).unwrap())
                .variables(object(variables))
                .build(),
        )
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn identical_watches_share_one_request() {
    let network = MockNetworkInterface::new();
    network
        .mock_delayed(ME, json!({}), me("ada"), Duration::from_millis(20))
        .unwrap();
    let client = client(&network);

    let first = watch(&client, ME, json!({}));
    let second = watch(&client, ME, json!({}));
    let mut first_subscription = first.subscribe().unwrap();
    let mut second_subscription = second.subscribe().unwrap();

    let (first_result, second_result) =
        tokio::join!(first_subscription.next(), second_subscription.next());
    assert_eq!(first_result.unwrap().data, second_result.unwrap().data);
    assert_eq!(network.call_count(), 1);
}

#[test_log::test(tokio::test)]
async fn deduplication_can_be_disabled() {
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network.mock(ME, json!({}), me("ada")).unwrap();
    let client = client_with(
        &network,
        Configuration::builder()
            .query_deduplication(false)
            .build()
            .unwrap(),
    );
    let options = QueryOptions::builder()
        .query(Query::parse(ME).unwrap())
        .fetch_policy(FetchPolicy::NetworkOnly)
        .build();

    let (first, second) = tokio::join!(client.query(options.clone()), client.query(options));
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(network.call_count(), 2);
}

#[test_log::test(tokio::test)]
async fn stale_responses_are_discarded() {
    let network = MockNetworkInterface::new();
    network.mock(NODE, json!({"id": "1"}), node("1", "first")).unwrap();
    network
        .mock_delayed(
            NODE,
            json!({"id": "slow"}),
            node("slow", "slow"),
            Duration::from_millis(100),
        )
        .unwrap();
    network
        .mock_delayed(
            NODE,
            json!({"id": "fast"}),
            node("fast", "fast"),
            Duration::from_millis(10),
        )
        .unwrap();
    let client = client_with(
        &network,
        Configuration::builder()
            .query_deduplication(false)
            .build()
            .unwrap(),
    );
    let observable = watch(&client, NODE, json!({"id": "1"}));
    let mut subscription = observable.subscribe().unwrap();
    assert_eq!(
        subscription.next().await.unwrap().data["node"]["name"],
        json!("first")
    );

    let (slow, fast) = tokio::join!(
        observable.refetch(Some(object(json!({"id": "slow"})))),
        observable.refetch(Some(object(json!({"id": "fast"})))),
    );
    // the superseded refetch still resolves with its own data
    assert_eq!(slow.unwrap().data["node"]["name"], json!("slow"));
    assert_eq!(fast.unwrap().data["node"]["name"], json!("fast"));

    assert_eq!(
        subscription.next().await.unwrap().data["node"]["name"],
        json!("fast")
    );
    assert!(subscription.next().now_or_never().is_none());
    assert_eq!(
        observable.current_result().unwrap().data["node"]["name"],
        json!("fast")
    );
    assert!(!client.extract().contains_key("Node:slow"));
}

#[test_log::test(tokio::test)]
async fn network_errors_keep_the_last_data() {
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network
        .mock_error(
            ME,
            json!({}),
            FetchError::Transport {
                reason: "connection reset".to_string(),
            },
        )
        .unwrap();
    let client = client(&network);
    let observable = watch(&client, ME, json!({}));
    let mut subscription = observable.subscribe().unwrap();
    let ready = subscription.next().await.unwrap();
    let before = client.extract();

    let error = observable.refetch(None).await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "network error: HTTP fetch failed: connection reset"
    );

    let failed = subscription.next().await.unwrap();
    assert_eq!(failed.data, ready.data);
    assert_eq!(failed.network_status, NetworkStatus::Error);
    assert!(!failed.loading);
    assert_eq!(failed.error, Some(error));
    assert_eq!(client.extract(), before);
}

#[test_log::test(tokio::test)]
async fn graphql_errors_are_attached_to_the_result() {
    let network = MockNetworkInterface::new();
    network
        .mock(
            ME,
            json!({}),
            json!({
                "data": {"me": null},
                "errors": [{"message": "not logged in", "path": ["me"]}]
            }),
        )
        .unwrap();
    let client = client(&network);
    let observable = watch(&client, ME, json!({}));
    let mut subscription = observable.subscribe().unwrap();

    let result = subscription.next().await.unwrap();
    assert_eq!(result.data, json!({"me": null}));
    assert_eq!(result.network_status, NetworkStatus::Error);
    let error = result.error.unwrap();
    assert_eq!(error.graphql_errors().len(), 1);
    assert_eq!(error.graphql_errors()[0].message, "not logged in");
}

#[test_log::test(tokio::test)]
async fn writes_reach_every_watch_of_the_same_object() {
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network
        .mock(
            NODE,
            json!({"id": "1"}),
            json!({"data": {"node": {"id": "1", "name": "ada", "__typename": "User"}}}),
        )
        .unwrap();
    network.mock(ME, json!({}), me("grace")).unwrap();
    let client = client(&network);

    let by_node = watch(&client, NODE, json!({"id": "1"}));
    let mut node_subscription = by_node.subscribe().unwrap();
    assert_eq!(
        node_subscription.next().await.unwrap().data["node"]["name"],
        json!("ada")
    );
    let by_me = watch(&client, ME, json!({}));
    let mut me_subscription = by_me.subscribe().unwrap();
    me_subscription.next().await.unwrap();

    by_me.refetch(None).await.unwrap();
    assert_eq!(
        me_subscription.next().await.unwrap().data["me"]["name"],
        json!("grace")
    );
    assert_eq!(
        node_subscription.next().await.unwrap().data["node"]["name"],
        json!("grace")
    );
    assert_eq!(network.call_count(), 3);
}

#[test_log::test(tokio::test)]
async fn polling_refetches_until_stopped() {
    let network = MockNetworkInterface::new();
    for name in ["ada", "grace", "edsger"] {
        network.mock(ME, json!({}), me(name)).unwrap();
    }
    let client = client(&network);
    let observable = client
        .watch_query(
            WatchQueryOptions::builder()
                .query(Query::parse(ME).unwrap())
                .poll_interval(Duration::from_millis(30))
                .build(),
        )
        .unwrap();
    let mut subscription = observable.subscribe().unwrap();

    let mut names = Vec::new();
    for _ in 0..3 {
        let result = tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .unwrap()
            .unwrap();
        names.push(result.data["me"]["name"].as_str().unwrap().to_string());
    }
    observable.stop_polling().unwrap();
    assert_eq!(names, ["ada", "grace", "edsger"]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(network.call_count(), 3);
}

#[test_log::test(tokio::test)]
async fn start_polling_on_a_running_query() {
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network.mock(ME, json!({}), me("grace")).unwrap();
    let client = client(&network);
    let observable = watch(&client, ME, json!({}));
    let mut subscription = observable.subscribe().unwrap();
    subscription.next().await.unwrap();

    observable.start_polling(Duration::from_millis(20)).unwrap();
    let polled = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(polled.data["me"]["name"], json!("grace"));
    drop(subscription);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(network.call_count(), 2);
}

#[test_log::test(tokio::test)]
async fn forced_fetches_are_served_from_the_cache_after_server_rendering() {
    let network = MockNetworkInterface::new();
    let state = json!({
        "ROOT_QUERY": {"me": {"type": "id", "id": "User:1", "generated": false}},
        "User:1": {"id": "1", "name": "ada", "__typename": "User"}
    });
    let client = Client::builder()
        .network_interface(network.clone())
        .configuration(
            Configuration::builder()
                .ssr_force_fetch_delay(Duration::from_secs(60))
                .build()
                .unwrap(),
        )
        .initial_state(object(state))
        .build()
        .unwrap();

    let observable = client
        .watch_query(
            WatchQueryOptions::builder()
                .query(Query::parse(ME).unwrap())
                .fetch_policy(FetchPolicy::NetworkOnly)
                .build(),
        )
        .unwrap();
    let mut subscription = observable.subscribe().unwrap();
    let result = subscription.next().await.unwrap();
    assert_eq!(result.data["me"]["name"], json!("ada"));
    assert!(!result.loading);
    assert_eq!(network.call_count(), 0);
}

#[test_log::test(tokio::test)]
async fn cache_and_network_emits_twice() {
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network.mock(ME, json!({}), me("grace")).unwrap();
    let client = client(&network);
    client
        .query(QueryOptions::builder().query(Query::parse(ME).unwrap()).build())
        .await
        .unwrap();

    let observable = client
        .watch_query(
            WatchQueryOptions::builder()
                .query(Query::parse(ME).unwrap())
                .fetch_policy(FetchPolicy::CacheAndNetwork)
                .build(),
        )
        .unwrap();
    let mut subscription = observable.subscribe().unwrap();
    let cached = subscription.next().await.unwrap();
    assert_eq!(cached.data["me"]["name"], json!("ada"));
    assert!(cached.loading);
    let fetched = subscription.next().await.unwrap();
    assert_eq!(fetched.data["me"]["name"], json!("grace"));
    assert!(!fetched.loading);
}

#[test_log::test(tokio::test)]
async fn partial_fetching_requests_only_missing_fields() {
    let both = "query both { me { id name } settings { theme } }";
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network
        .mock(
            "query both { settings { theme } }",
            json!({}),
            json!({"data": {"settings": {"theme": "dark", "__typename": "Settings"}}}),
        )
        .unwrap();
    let client = client_with(
        &network,
        Configuration::builder()
            .partial_fetching(true)
            .build()
            .unwrap(),
    );
    client
        .query(QueryOptions::builder().query(Query::parse(ME).unwrap()).build())
        .await
        .unwrap();

    let observable = watch(&client, both, json!({}));
    let mut subscription = observable.subscribe().unwrap();
    let result = subscription.next().await.unwrap();
    assert_eq!(
        result.data,
        json!({
            "me": {"id": "1", "name": "ada", "__typename": "User"},
            "settings": {"theme": "dark", "__typename": "Settings"}
        })
    );
    insta::assert_snapshot!(network.requests()[1].query, @r###"
    query both {
      settings {
        theme
        __typename
      }
    }
    "###);
}

#[test_log::test(tokio::test)]
async fn partial_fetching_sends_only_the_variables_still_used() {
    let both = "query both($id: ID!) { node(id: $id) { id name } settings { theme } }";
    let network = MockNetworkInterface::new();
    network.mock(NODE, json!({"id": "1"}), node("1", "ada")).unwrap();
    network
        .mock(
            "query both { settings { theme } }",
            json!({}),
            json!({"data": {"settings": {"theme": "dark", "__typename": "Settings"}}}),
        )
        .unwrap();
    let client = client_with(
        &network,
        Configuration::builder()
            .partial_fetching(true)
            .build()
            .unwrap(),
    );
    client
        .query(
            QueryOptions::builder()
                .query(Query::parse(NODE).unwrap())
                .variables(object(json!({"id": "1"})))
                .build(),
        )
        .await
        .unwrap();

    let result = client
        .query(
            QueryOptions::builder()
                .query(Query::parse(both).unwrap())
                .variables(object(json!({"id": "1"})))
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(result.data["node"]["name"], json!("ada"));
    assert_eq!(result.data["settings"]["theme"], json!("dark"));
    let sent = &network.requests()[1];
    assert!(sent.variables.is_empty());
    insta::assert_snapshot!(sent.query, @r###"
    query both {
      settings {
        theme
        __typename
      }
    }
    "###);
}

#[test_log::test(tokio::test)]
async fn mutations_update_watches_and_refetch_named_queries() {
    let rename = "mutation rename($name: String!) { rename(name: $name) { id name } }";
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network
        .mock(
            rename,
            json!({"name": "grace"}),
            json!({"data": {"rename": {"id": "1", "name": "grace", "__typename": "User"}}}),
        )
        .unwrap();
    network.mock(ME, json!({}), me("grace")).unwrap();
    let client = client(&network);
    let observable = watch(&client, ME, json!({}));
    let mut subscription = observable.subscribe().unwrap();
    subscription.next().await.unwrap();

    let result = client
        .mutate(
            MutationOptions::builder()
                .mutation(Query::parse(rename).unwrap())
                .variables(object(json!({"name": "grace"})))
                .refetch_queries(vec!["me".to_string()])
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(result.data["rename"]["name"], json!("grace"));

    // normalization alone updates the watch
    assert_eq!(
        subscription.next().await.unwrap().data["me"]["name"],
        json!("grace")
    );
    let extracted = client.extract();
    assert!(extracted.contains_key("ROOT_MUTATION"));

    // then the named refetch goes out
    tokio::time::timeout(Duration::from_secs(2), async {
        while network.call_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[test_log::test(tokio::test)]
async fn mutations_are_never_deduplicated() {
    let bump = "mutation bump { bump { id count } }";
    let network = MockNetworkInterface::new();
    for count in [1, 2] {
        network
            .mock(
                bump,
                json!({}),
                json!({"data": {"bump": {"id": "1", "count": count, "__typename": "Counter"}}}),
            )
            .unwrap();
    }
    let client = client(&network);
    let options = MutationOptions::builder()
        .mutation(Query::parse(bump).unwrap())
        .build();
    let (first, second) = tokio::join!(client.mutate(options.clone()), client.mutate(options));
    assert_ne!(first.unwrap(), second.unwrap());
    assert_eq!(network.call_count(), 2);
}

#[test_log::test(tokio::test)]
async fn reset_store_refetches_active_queries() {
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    network.mock(ME, json!({}), me("grace")).unwrap();
    let client = client(&network);
    let observable = watch(&client, ME, json!({}));
    let mut subscription = observable.subscribe().unwrap();
    subscription.next().await.unwrap();

    client.reset_store().await.unwrap();
    assert_eq!(
        subscription.next().await.unwrap().data["me"]["name"],
        json!("grace")
    );
    assert_eq!(network.call_count(), 2);
}

#[test_log::test(tokio::test)]
async fn extract_and_restore() {
    let network = MockNetworkInterface::new();
    network.mock(ME, json!({}), me("ada")).unwrap();
    let client = client(&network);
    client
        .query(QueryOptions::builder().query(Query::parse(ME).unwrap()).build())
        .await
        .unwrap();
    let state = client.extract();
    insta::assert_json_snapshot!(state, @r###"
    {
      "ROOT_QUERY": {
        "me": {
          "type": "id",
          "id": "User:1",
          "generated": false
        }
      },
      "User:1": {
        "id": "1",
        "name": "ada",
        "__typename": "User"
      }
    }
    "###);

    let other = MockNetworkInterface::new();
    let restored = client_with(&other, Configuration::default());
    restored.restore(&state).unwrap();
    let result = restored
        .query(
            QueryOptions::builder()
                .query(Query::parse(ME).unwrap())
                .fetch_policy(FetchPolicy::CacheOnly)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(result.data["me"]["name"], json!("ada"));
    assert_eq!(other.call_count(), 0);

    let invalid = object(json!({"User:1": {"friend": {"type": "id"}}}));
    assert!(matches!(
        restored.restore(&invalid),
        Err(ClientError::Write(_))
    ));
}

#[test_log::test(tokio::test)]
async fn write_then_read_query() {
    let network = MockNetworkInterface::new();
    let client = client(&network);
    let query = Query::parse(NODE).unwrap();
    let variables = object(json!({"id": "7"}));

    assert!(matches!(
        client.read_query(&query, &variables),
        Err(ClientError::Read(_))
    ));
    client
        .write_query(
            &query,
            &variables,
            &object(json!({"node": {"id": "7", "name": "seven", "__typename": "Node"}})),
        )
        .unwrap();
    assert_eq!(
        client.read_query(&query, &variables).unwrap(),
        json!({"node": {"id": "7", "name": "seven", "__typename": "Node"}})
    );
    assert!(matches!(
        client.write_query(&query, &variables, &object(json!({"node": {"id": "7"}}))),
        Err(ClientError::Write(_))
    ));
}
