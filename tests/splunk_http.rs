//! Job-lifecycle tests for the Splunk backend, using a mock server.

use logfuse::backend::splunk::{SplunkBackend, SplunkClient};
use logfuse::backend::Backend;
use logfuse::filter::Filter;
use logfuse::opt::Opt;
use logfuse::search::LogSearch;
use logfuse::FuseError;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn results(messages: &[&str]) -> serde_json::Value {
    json!({
        "results": messages
            .iter()
            .map(|m| json!({
                "_raw": m,
                "_time": "2024-05-01T10:00:00Z",
                "host": "web-1"
            }))
            .collect::<Vec<_>>()
    })
}

async fn mount_job(server: &MockServer, sid: &str, polls_to_done: usize) {
    Mock::given(method("POST"))
        .and(path("/services/search/jobs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": sid})))
        .mount(server)
        .await;

    if polls_to_done > 0 {
        Mock::given(method("GET"))
            .and(path(format!("/services/search/jobs/{sid}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"entry": [{"content": {"isDone": false, "dispatchState": "RUNNING"}}]}),
            ))
            .up_to_n_times(polls_to_done as u64)
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(format!("/services/search/jobs/{sid}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"entry": [{"content": {"isDone": true, "dispatchState": "DONE"}}]}),
        ))
        .mount(server)
        .await;
}

fn main_index_search() -> LogSearch {
    let mut search = LogSearch {
        filter: Some(Filter::equals("level", "ERROR")),
        size: Opt::Value(10),
        ..LogSearch::default()
    };
    search.range.last = Opt::from("15m");
    search.options.insert("index".to_string(), "main".into());
    search
        .options
        .insert("pollInterval".to_string(), "5ms".into());
    search
}

#[tokio::test]
async fn job_lifecycle_dispatch_poll_fetch() {
    let server = MockServer::start().await;
    mount_job(&server, "job42", 2).await;
    Mock::given(method("GET"))
        .and(path("/services/search/jobs/job42/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(&["newest", "oldest"])))
        .mount(&server)
        .await;

    let backend = SplunkBackend::new(SplunkClient::new(server.uri()));
    let mut result = backend
        .query(CancellationToken::new(), main_index_search())
        .await
        .unwrap();

    let (entries, updates) = result.entries(CancellationToken::new()).await.unwrap();
    assert!(updates.is_none());
    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["oldest", "newest"]);
    assert_eq!(entries[0].field("host"), "web-1");

    // Short page, no token.
    assert!(result.pagination().is_none());

    // The dispatch body carries the SPL query and the window.
    let requests = server.received_requests().await.unwrap();
    let dispatch = std::str::from_utf8(&requests[0].body).unwrap();
    assert!(dispatch.contains("earliest_time=-15m"), "{dispatch}");
    assert!(dispatch.contains("latest_time=now"), "{dispatch}");
    assert!(
        dispatch.contains("search+index%3Dmain+level%3D%22ERROR%22"),
        "{dispatch}"
    );
}

#[tokio::test]
async fn full_page_yields_next_offset_token() {
    let server = MockServer::start().await;
    mount_job(&server, "job7", 0).await;
    Mock::given(method("GET"))
        .and(path("/services/search/jobs/job7/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(&["b", "a"])))
        .mount(&server)
        .await;

    let backend = SplunkBackend::new(SplunkClient::new(server.uri()));
    let mut search = main_index_search();
    search.size = Opt::Value(2);
    search.page_token = Opt::from("4");

    let mut result = backend
        .query(CancellationToken::new(), search)
        .await
        .unwrap();
    let (entries, _) = result.entries(CancellationToken::new()).await.unwrap();
    assert_eq!(entries.len(), 2);

    let pagination = result.pagination().expect("full page paginates");
    assert_eq!(pagination.next_page_token, "6");
}

#[tokio::test]
async fn transforming_queries_fetch_from_results() {
    let server = MockServer::start().await;
    mount_job(&server, "job9", 0).await;
    Mock::given(method("GET"))
        .and(path("/services/search/jobs/job9/results"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"count": "42", "host": "web-1"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = SplunkBackend::new(SplunkClient::new(server.uri()));
    let mut search = main_index_search();
    search.filter = None;
    search.native_query = Opt::from("index=main | stats count by host");

    let mut result = backend
        .query(CancellationToken::new(), search)
        .await
        .unwrap();
    let (entries, _) = result.entries(CancellationToken::new()).await.unwrap();

    // Aggregated rows have no _time; the entry is field-only.
    assert_eq!(entries.len(), 1);
    assert!(entries[0].timestamp.is_none());
    assert_eq!(entries[0].field("count"), "42");
}

#[tokio::test]
async fn realtime_dispatch_sets_mode_and_rt_bounds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/search/jobs"))
        .and(body_string_contains("search_mode=realtime"))
        .and(body_string_contains("earliest_time=rt-15m"))
        .and(body_string_contains("latest_time=rt"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "rt1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/search/jobs/rt1/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(results(&["live"])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/services/search/jobs/rt1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let backend = SplunkBackend::new(SplunkClient::new(server.uri()));
    let mut search = main_index_search();
    search.follow = true;
    search.refresh.duration = Opt::from("10ms");

    let cancel = CancellationToken::new();
    let mut result = backend.query(cancel.clone(), search).await.unwrap();
    let (initial, updates) = result.entries(cancel.clone()).await.unwrap();
    assert!(initial.is_empty());

    let mut updates = updates.expect("realtime stream");
    let batch = updates.recv().await.expect("live batch");
    assert_eq!(batch[0].message, "live");

    // Cancellation closes the stream and deletes the job.
    cancel.cancel();
    let closed = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while updates.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "stream did not close");

    // Give the teardown DELETE a moment to land.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let deleted = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .any(|r| r.method.to_string().eq_ignore_ascii_case("DELETE"));
    assert!(deleted, "real-time job was not deleted");
}

#[tokio::test]
async fn failed_job_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/search/jobs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "bad1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/search/jobs/bad1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"entry": [{"content": {"isDone": false, "dispatchState": "FAILED"}}]}),
        ))
        .mount(&server)
        .await;

    let backend = SplunkBackend::new(SplunkClient::new(server.uri()));
    let err = backend
        .query(CancellationToken::new(), main_index_search())
        .await
        .unwrap_err();
    assert!(matches!(err, FuseError::JobFailed { .. }), "{err}");
}
