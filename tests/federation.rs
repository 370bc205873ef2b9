//! End-to-end federation: two configured sources, one merged result.

use logfuse::backend::adapter;
use logfuse::backend::aggregator::MultiSearchResult;
use logfuse::backend::SearchResult;
use logfuse::config::Config;
use logfuse::opt::Opt;
use logfuse::search::LogSearch;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

/// Two line-reader sources emitting interleaved JSON log lines.
fn two_source_config() -> Config {
    let yaml = r#"
sources:
  svc-a:
    type: command
    options:
      cmd: >-
        printf '{"message":"a1","timestamp":"2024-05-01T10:00:00Z"}\n{"message":"a2","timestamp":"2024-05-01T10:02:00Z"}\n'
  svc-b:
    type: command
    options:
      cmd: >-
        printf '{"message":"b1","timestamp":"2024-05-01T10:01:00Z"}\n{"message":"b2","timestamp":"2024-05-01T10:03:00Z"}\n'
searches:
  recent:
    search:
      field_extraction: { json: true }
"#;
    serde_yaml::from_str(yaml).unwrap()
}

async fn federated_query(config: &Config, base: &LogSearch) -> MultiSearchResult {
    let aggregator = MultiSearchResult::new(base.clone()).unwrap();
    for context in ["svc-a", "svc-b"] {
        let source = config.source(context).unwrap();
        let backend = source.build_backend().unwrap();
        let search = source.apply_to(context, base);
        let result = backend
            .query(CancellationToken::new(), search)
            .await
            .unwrap();
        aggregator.add(result);
    }
    aggregator
}

#[tokio::test]
async fn merged_entries_are_globally_time_sorted() {
    let config = two_source_config();
    let base = config.resolve_search("recent").unwrap();

    let mut aggregator = federated_query(&config, &base).await;
    let (entries, updates) = aggregator.entries(CancellationToken::new()).await.unwrap();
    assert!(updates.is_none());

    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["a1", "b1", "a2", "b2"]);

    let contexts: Vec<_> = entries.iter().map(|e| e.context_id.as_str()).collect();
    assert_eq!(contexts, vec!["svc-a", "svc-b", "svc-a", "svc-b"]);
}

#[tokio::test]
async fn first_child_size_caps_the_merged_slice() {
    let config = two_source_config();
    let mut base = config.resolve_search("recent").unwrap();
    base.size = Opt::Value(3);

    let mut aggregator = federated_query(&config, &base).await;
    let (entries, _) = aggregator.entries(CancellationToken::new()).await.unwrap();

    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["a1", "b1", "a2"]);
}

#[tokio::test]
async fn page_token_is_rejected_up_front() {
    let search = LogSearch {
        page_token: Opt::from("10"),
        ..LogSearch::default()
    };
    assert!(MultiSearchResult::new(search).is_err());
}

#[tokio::test]
async fn adapter_drains_a_federated_result() {
    let config = two_source_config();
    let base = config.resolve_search("recent").unwrap();

    let mut aggregator = federated_query(&config, &base).await;
    let entries = adapter::collect(&mut aggregator, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(entries.len(), 4);
}

#[tokio::test]
async fn merged_fields_union_across_sources() {
    let yaml = r#"
sources:
  one:
    type: command
    options:
      cmd: "printf '{\"message\":\"m\",\"host\":\"web-1\"}\n'"
  two:
    type: command
    options:
      cmd: "printf '{\"message\":\"m\",\"host\":\"web-2\"}\n'"
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    let mut base = LogSearch::default();
    base.field_extraction.json = Opt::Value(true);

    let aggregator = MultiSearchResult::new(base.clone()).unwrap();
    for context in ["one", "two"] {
        let source = config.source(context).unwrap();
        let backend = source.build_backend().unwrap();
        let result = backend
            .query(CancellationToken::new(), source.apply_to(context, &base))
            .await
            .unwrap();
        aggregator.add(result);
    }

    let mut aggregator = aggregator;
    let (fields, _) = aggregator.fields(CancellationToken::new()).await.unwrap();

    let hosts: Vec<_> = fields["host"].iter().cloned().collect();
    assert_eq!(hosts, vec!["web-1", "web-2"]);
}
