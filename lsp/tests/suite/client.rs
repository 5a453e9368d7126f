use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use ttx_highlight::{HighlightSpan, Position, Range};
use ttx_lsp::{
    AnalyzerConfig, ClientError, Diagnostic, DiagnosticsSink, FileChangeType, SessionError,
    SessionState, TtxClient,
};

use crate::common::{FakeAnalyzer, Handler, Reply, eventually, handler, lifecycle_only, workspace_root};

const URI: &str = "file:///w/main.ttx";

/// Lines 2, 3 and 4 are 20, 10 and 8 characters long.
const SOURCE: &str = "type A {\n\n/* the block comment\n  carry on\n  end */\n}";

async fn attached(handler: Handler) -> (TtxClient, FakeAnalyzer) {
    let client = TtxClient::new(AnalyzerConfig::default(), workspace_root());
    let (fake, (reader, writer)) = FakeAnalyzer::spawn(handler);
    client.attach(reader, writer).await.expect("attach");
    (client, fake)
}

fn tokenize_reply(batch: Value) -> Handler {
    handler(move |method, _| match method {
        "tokenize" => Reply::Result(batch.clone()),
        _ => Reply::Result(Value::Null),
    })
}

fn coordinates(spans: &[HighlightSpan]) -> Vec<(String, u32, u32, u32)> {
    spans
        .iter()
        .map(|span| {
            (
                span.category().to_string(),
                span.line(),
                span.start().character,
                span.end().character,
            )
        })
        .collect()
}

#[tokio::test]
async fn multiline_comment_is_split_per_line() {
    let (client, _fake) = attached(tokenize_reply(json!({
        "usesAlternateNamespace": false,
        "tokens": [["K", 0, 0, 0, 4], ["Cm", 2, 5, 4, 3]]
    })))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();

    let decoded = client.highlight_spans(URI).await.unwrap().unwrap();
    assert_eq!(
        coordinates(&decoded.spans),
        vec![
            ("ttxK".to_string(), 0, 0, 4),
            ("ttxCm".to_string(), 2, 5, 20),
            ("ttxCm".to_string(), 3, 0, 10),
            ("ttxCm".to_string(), 4, 0, 3),
        ]
    );
    assert!(decoded.unknown.is_empty());
}

#[tokio::test]
async fn legacy_color_flag_selects_namespace() {
    let (client, _fake) = attached(tokenize_reply(json!({
        "color": 0,
        "tokens": [["Id", 0, 5, 0, 6]]
    })))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();

    let decoded = client.highlight_spans(URI).await.unwrap().unwrap();
    assert_eq!(decoded.spans[0].category().to_string(), "cppId");
}

#[tokio::test]
async fn unknown_kind_is_dropped_not_fatal() {
    let (client, _fake) = attached(tokenize_reply(json!({
        "usesAlternateNamespace": true,
        "tokens": [["Xyz", 0, 0, 0, 4], ["T", 0, 5, 0, 6]]
    })))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();

    let decoded = client.highlight_spans(URI).await.unwrap().unwrap();
    assert_eq!(decoded.unknown, vec!["cppXyz"]);
    assert_eq!(coordinates(&decoded.spans), vec![("cppT".to_string(), 0, 5, 6)]);
}

#[tokio::test]
async fn malformed_batch_fails_whole_request() {
    let (client, _fake) = attached(tokenize_reply(json!({
        "usesAlternateNamespace": false,
        "tokens": [["K", 0, 0, 0, 4], ["Cm", 4, 0, 2, 0]]
    })))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();

    match client.highlight_spans(URI).await {
        Err(ClientError::Malformed(err)) => assert_eq!(err.index(), 1),
        other => panic!("expected malformed batch, got {other:?}"),
    }
}

#[tokio::test]
async fn token_past_document_end_is_malformed() {
    let (client, _fake) = attached(tokenize_reply(json!({
        "tokens": [["S", 5, 0, 9, 1]]
    })))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();
    assert!(matches!(
        client.highlight_spans(URI).await,
        Err(ClientError::Malformed(_))
    ));
}

#[tokio::test]
async fn superseded_tokenize_reply_is_discarded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (client, _fake) = attached(handler(move |method, _| {
        if method != "tokenize" {
            return Reply::Result(Value::Null);
        }
        let batch = Reply::Result(json!({ "tokens": [["K", 0, 0, 0, 4]] }));
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::after_ms(150, batch)
        } else {
            batch
        }
    }))
    .await;
    let client = Arc::new(client);
    client.open_document(URI, SOURCE).await.unwrap();

    let stale = {
        let client = client.clone();
        tokio::spawn(async move { client.highlight_spans(URI).await })
    };
    let probe = &calls;
    eventually(|| async move { probe.load(Ordering::SeqCst) == 1 }).await;

    client.change_document(URI, "type B {}").await.unwrap();
    let fresh = client.highlight_spans(URI).await.unwrap();
    assert!(fresh.is_some());

    assert!(stale.await.unwrap().unwrap().is_none());
}

#[tokio::test]
async fn unsuperseded_reply_applies_after_edit() {
    let (client, _fake) = attached(handler(|method, _| match method {
        "tokenize" => Reply::after_ms(
            50,
            Reply::Result(json!({ "tokens": [["K", 0, 0, 0, 4]] })),
        ),
        _ => Reply::Result(Value::Null),
    }))
    .await;
    let client = Arc::new(client);
    client.open_document(URI, SOURCE).await.unwrap();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.highlight_spans(URI).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.change_document(URI, "type A {}\n").await.unwrap();

    let decoded = pending.await.unwrap().unwrap();
    assert_eq!(decoded.unwrap().spans.len(), 1);
}

#[tokio::test]
async fn semantic_tokens_are_delta_encoded() {
    let (client, _fake) = attached(tokenize_reply(json!({
        "tokens": [["Cm", 2, 5, 3, 4], ["K", 0, 0, 0, 4]]
    })))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();

    let tokens = client.semantic_tokens(URI).await.unwrap().unwrap();
    let legend = client.legend();
    let keyword = legend.index_of("ttxK").unwrap();
    let comment = legend.index_of("ttxCm").unwrap();
    assert_eq!(
        tokens.data,
        vec![
            0, 0, 4, keyword, 0, //
            2, 5, 15, comment, 0, //
            1, 0, 4, comment, 0,
        ]
    );
}

#[tokio::test]
async fn empty_format_reply_replaces_whole_document() {
    let (client, mut fake) = attached(handler(|method, _| match method {
        "format" => Reply::Result(json!({ "document": "" })),
        _ => Reply::Result(Value::Null),
    }))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();

    let edits = client.format(URI).await.unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(
        edits[0].range,
        Range::new(Position::new(0, 0), Position::new(5, 1))
    );
    assert_eq!(edits[0].new_text, "");

    let request = fake.expect("format").await;
    assert_eq!(request["params"]["source"], SOURCE);
    assert!(request["params"]["name"].as_str().unwrap().ends_with("main.ttx"));
}

#[tokio::test]
async fn failed_format_produces_no_edit() {
    let (client, _fake) = attached(handler(|method, _| match method {
        "format" => Reply::Error {
            code: -32603,
            message: "parse error at 3:1".into(),
        },
        _ => Reply::Result(Value::Null),
    }))
    .await;
    client.open_document(URI, SOURCE).await.unwrap();

    assert!(matches!(
        client.format(URI).await,
        Err(ClientError::Session(SessionError::Rpc { .. }))
    ));
}

#[tokio::test]
async fn document_sync_sends_versions() {
    let (client, mut fake) = attached(lifecycle_only()).await;

    client.open_document(URI, "a").await.unwrap();
    client.change_document(URI, "ab").await.unwrap();
    client.change_document(URI, "abc").await.unwrap();
    client.close_document(URI).await.unwrap();

    let open = fake.expect("textDocument/didOpen").await;
    assert_eq!(open["params"]["textDocument"]["languageId"], "tetrodotoxin");
    assert_eq!(open["params"]["textDocument"]["version"], 1);
    let change = fake.expect("textDocument/didChange").await;
    assert_eq!(change["params"]["textDocument"]["version"], 2);
    let change = fake.expect("textDocument/didChange").await;
    assert_eq!(change["params"]["textDocument"]["version"], 3);
    assert_eq!(change["params"]["contentChanges"][0]["text"], "abc");
    fake.expect("textDocument/didClose").await;

    assert_eq!(client.document_version(URI).await, None);
    assert!(matches!(
        client.highlight_spans(URI).await,
        Err(ClientError::UnknownDocument(_))
    ));
}

#[tokio::test]
async fn changing_unopened_document_opens_it() {
    let (client, mut fake) = attached(lifecycle_only()).await;
    client.change_document(URI, "type A {}").await.unwrap();
    let open = fake.expect("textDocument/didOpen").await;
    assert_eq!(open["params"]["textDocument"]["version"], 1);
}

#[tokio::test]
async fn reopening_an_open_document_sends_a_change() {
    let (client, mut fake) = attached(lifecycle_only()).await;
    client.open_document(URI, "a").await.unwrap();
    client.open_document(URI, "ab").await.unwrap();

    fake.expect("textDocument/didOpen").await;
    let change = fake.expect("textDocument/didChange").await;
    assert_eq!(change["params"]["textDocument"]["version"], 2);
    assert_eq!(change["params"]["contentChanges"][0]["text"], "ab");
    let opens = fake
        .drain()
        .iter()
        .filter(|frame| frame["method"] == "textDocument/didOpen")
        .count();
    assert_eq!(opens, 0);
    assert_eq!(client.document_version(URI).await, Some(2));
}

#[tokio::test]
async fn watched_files_are_filtered_by_extension() {
    let (client, mut fake) = attached(lifecycle_only()).await;
    let root = workspace_root();

    let forwarded = client
        .watched_files_changed(&[
            (root.join("a.ttx"), FileChangeType::Created),
            (root.join("README.md"), FileChangeType::Changed),
            (root.join("lib").join("b.ttx"), FileChangeType::Deleted),
        ])
        .await
        .unwrap();
    assert_eq!(forwarded, 2);

    let notification = fake.expect("workspace/didChangeWatchedFiles").await;
    let changes = notification["params"]["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes[0]["uri"].as_str().unwrap().ends_with("a.ttx"));
    assert_eq!(changes[0]["type"], 1);
    assert_eq!(changes[1]["type"], 3);

    let none = client
        .watched_files_changed(&[(PathBuf::from("/w/notes.txt"), FileChangeType::Changed)])
        .await
        .unwrap();
    assert_eq!(none, 0);
}

/// Records publications in arrival order.
#[derive(Default)]
struct Recorder {
    published: Vec<(String, Vec<Diagnostic>)>,
}

impl DiagnosticsSink for Recorder {
    fn publish(&mut self, uri: &str, diagnostics: &[Diagnostic]) {
        self.published.push((uri.to_string(), diagnostics.to_vec()));
    }
}

#[tokio::test]
async fn diagnostics_reach_the_sink_unchanged() {
    let client = TtxClient::with_sink(AnalyzerConfig::default(), workspace_root(), Recorder::default());
    let (fake, (reader, writer)) = FakeAnalyzer::spawn(lifecycle_only());
    client.attach(reader, writer).await.unwrap();

    let batch = json!([
        {
            "range": { "start": { "line": 4, "character": 2 }, "end": { "line": 4, "character": 9 } },
            "severity": 1,
            "code": 17,
            "source": "ttx",
            "message": "unknown type `Foo`",
            "relatedInformation": []
        },
        {
            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 4 } },
            "severity": 2,
            "message": "unused import"
        }
    ]);
    fake.publish_diagnostics(URI, batch.clone()).await;

    let probe = &client;
    eventually(|| async move {
        probe.poll_events(16);
        probe.inspect_sink(|sink| !sink.published.is_empty())
    })
    .await;

    client.inspect_sink(|sink| {
        assert_eq!(sink.published.len(), 1);
        let (uri, diagnostics) = &sink.published[0];
        assert_eq!(uri, URI);
        assert_eq!(serde_json::to_value(diagnostics).unwrap(), batch);
    });
}

#[tokio::test]
async fn default_store_tracks_latest_batch() {
    let (client, fake) = attached(lifecycle_only()).await;
    fake.publish_diagnostics(
        URI,
        json!([{
            "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
            "severity": 1,
            "message": "expected `}`"
        }]),
    )
    .await;

    let probe = &client;
    eventually(|| async move {
        probe.poll_events(16);
        probe.diagnostics().error_count() == 1
    })
    .await;
    assert_eq!(client.diagnostics().status_string(), "E:1 W:0");

    fake.publish_diagnostics(URI, json!([])).await;
    eventually(|| async move {
        probe.poll_events(16);
        probe.diagnostics().is_empty()
    })
    .await;
}

#[tokio::test]
async fn reconnect_reopens_remembered_documents() {
    let (client, fake) = attached(lifecycle_only()).await;
    client.open_document(URI, "a").await.unwrap();
    client.change_document(URI, "ab").await.unwrap();

    fake.disconnect().await;
    let probe = &client;
    eventually(|| async move { probe.state().await == SessionState::Stopped }).await;

    let (mut second, (reader, writer)) = FakeAnalyzer::spawn(lifecycle_only());
    client.attach(reader, writer).await.unwrap();
    let reopened = second.expect("textDocument/didOpen").await;
    assert_eq!(reopened["params"]["textDocument"]["uri"], URI);
    assert_eq!(reopened["params"]["textDocument"]["version"], 2);
    assert_eq!(reopened["params"]["textDocument"]["text"], "ab");
}

#[tokio::test]
async fn stop_reports_stopped() {
    let (client, mut fake) = attached(lifecycle_only()).await;
    client.stop().await;
    fake.expect("exit").await;
    assert_eq!(client.state().await, SessionState::Stopped);
    assert!(matches!(
        client.open_document(URI, "a").await,
        Err(ClientError::Session(SessionError::NotRunning))
    ));
}
