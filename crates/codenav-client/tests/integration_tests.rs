// Integration tests - LspClient and Transport against the in-process mock server

use codenav_client::mock::MockLspServer;
use codenav_client::{ClientOptions, LspClient, LspError, Message};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn options() -> ClientOptions {
    ClientOptions {
        request_timeout: Duration::from_secs(2),
        diagnostics_grace: Duration::from_millis(100),
        shutdown_timeout: Duration::from_millis(200),
        initialization_options: None,
    }
}

fn workspace_with(name: &str, text: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join(name);
    std::fs::write(&file, text).unwrap();
    (dir, file)
}

fn uri_of(path: &Path) -> String {
    lsp_types::Url::from_file_path(path).unwrap().to_string()
}

#[tokio::test]
async fn test_concurrent_calls_matched_out_of_order() {
    let server = MockLspServer::new()
        .on_request_simple("slow/echo", json!("slow"))
        .on_request_simple("fast/echo", json!("fast"))
        .with_delay("slow/echo", Duration::from_millis(200));
    let (transport, _handle) = server.start();
    let transport = Arc::new(transport);

    let slow = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.call("slow/echo", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast = assert_ok!(transport.call("fast/echo", json!({})).await);

    // The fast reply arrived first even though its request was sent second.
    assert!(!slow.is_finished());
    assert_eq!(fast, json!("fast"));
    assert_eq!(assert_ok!(slow.await.unwrap()), json!("slow"));
}

#[tokio::test]
async fn test_definition_opens_file_exactly_once_first() {
    let (dir, file) = workspace_with("main.go", "package main\n\nfunc main() {}\n");
    let target = uri_of(&file);

    let server = MockLspServer::new().on_request("textDocument/definition", move |params| {
        Ok(json!({
            "uri": params["textDocument"]["uri"],
            "range": {"start": {"line": 2, "character": 5}, "end": {"line": 2, "character": 9}}
        }))
    });
    let (transport, handle) = server.start();
    let client = assert_ok!(LspClient::connect(transport, "go", dir.path(), options()).await);

    let first = assert_ok!(client.definition(&file, 3, 7).await);
    let second = assert_ok!(client.definition(&file, 3, 7).await);
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!((first[0].line, first[0].column), (3, 6));
    assert_eq!((first[0].end_line, first[0].end_column), (3, 10));

    let methods = handle.methods();
    let opened = methods
        .iter()
        .position(|m| m == "textDocument/didOpen")
        .unwrap();
    let requested = methods
        .iter()
        .position(|m| m == "textDocument/definition")
        .unwrap();
    assert!(opened < requested);
    assert_eq!(handle.count("textDocument/didOpen"), 1);

    let open = handle.params_of("textDocument/didOpen").unwrap();
    assert_eq!(open["textDocument"]["uri"], json!(target));
    assert_eq!(open["textDocument"]["languageId"], "go");
    assert_eq!(open["textDocument"]["version"], 1);
    assert_eq!(open["textDocument"]["text"], "package main\n\nfunc main() {}\n");
}

#[tokio::test]
async fn test_concurrent_first_queries_share_one_did_open() {
    let (dir, file) = workspace_with("lib.rs", "pub fn answer() -> u32 { 42 }\n");
    let server = MockLspServer::new()
        .on_request_simple("textDocument/definition", json!(null))
        .on_request_simple("textDocument/hover", json!(null));
    let (transport, handle) = server.start();
    let client = Arc::new(assert_ok!(
        LspClient::connect(transport, "rust", dir.path(), options()).await
    ));

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let client = client.clone();
        let file = file.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                client.definition(&file, 1, 8).await.map(|_| ())
            } else {
                client.hover(&file, 1, 8).await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        assert_ok!(task.await.unwrap());
    }

    assert_eq!(handle.count("textDocument/didOpen"), 1);
    assert_eq!(handle.count("textDocument/definition"), 4);
}

#[tokio::test]
async fn test_definition_null_and_links() {
    let (dir, file) = workspace_with("app.ts", "export const x = 1;\n");
    let other = dir.path().join("other.ts");
    let other_uri = uri_of(&other);

    let server = MockLspServer::new()
        .on_request_simple("textDocument/definition", json!(null))
        .on_request_simple(
            "textDocument/references",
            json!([{
                "targetUri": other_uri,
                "targetRange": {"start": {"line": 0, "character": 0}, "end": {"line": 5, "character": 0}},
                "targetSelectionRange": {"start": {"line": 1, "character": 13}, "end": {"line": 1, "character": 14}}
            }]),
        );
    let (transport, handle) = server.start();
    let client = assert_ok!(
        LspClient::connect(transport, "typescript", dir.path(), options()).await
    );

    assert!(assert_ok!(client.definition(&file, 1, 14).await).is_empty());

    let refs = assert_ok!(client.references(&file, 1, 14, true).await);
    assert_eq!(refs.len(), 1);
    assert_eq!(PathBuf::from(&refs[0].file), other);
    assert_eq!((refs[0].line, refs[0].column), (2, 14));

    let params = handle.params_of("textDocument/references").unwrap();
    assert_eq!(params["context"]["includeDeclaration"], json!(true));
    assert_eq!(params["position"], json!({"line": 0, "character": 13}));
}

#[tokio::test]
async fn test_diagnostics_replace_and_clear() {
    let (dir, file) = workspace_with("main.py", "import os\nx = undefined\n");
    let uri = uri_of(&file);

    let (transport, handle) = MockLspServer::new().start();
    let client = assert_ok!(LspClient::connect(transport, "python", dir.path(), options()).await);

    // Nothing published yet: an empty list, not an error.
    assert!(assert_ok!(client.get_diagnostics(&file).await).is_empty());

    handle.notify(
        "textDocument/publishDiagnostics",
        json!({
            "uri": uri,
            "diagnostics": [
                {"range": {"start": {"line": 0, "character": 7}, "end": {"line": 0, "character": 9}},
                 "severity": 2, "source": "pyflakes", "message": "'os' imported but unused"},
                {"range": {"start": {"line": 1, "character": 4}, "end": {"line": 1, "character": 13}},
                 "severity": 1, "code": "E0602", "message": "undefined name 'undefined'"}
            ]
        }),
    );
    let diagnostics = assert_ok!(client.get_diagnostics(&file).await);
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics[0].severity, "warning");
    assert_eq!((diagnostics[0].line, diagnostics[0].column), (1, 8));
    assert_eq!(diagnostics[1].severity, "error");
    assert_eq!(diagnostics[1].code.as_deref(), Some("E0602"));

    handle.notify(
        "textDocument/publishDiagnostics",
        json!({
            "uri": uri,
            "diagnostics": [
                {"range": {"start": {"line": 1, "character": 4}, "end": {"line": 1, "character": 13}},
                 "severity": 1, "message": "undefined name 'undefined'"}
            ]
        }),
    );
    assert_eq!(assert_ok!(client.get_diagnostics(&file).await).len(), 1);

    handle.notify(
        "textDocument/publishDiagnostics",
        json!({"uri": uri, "diagnostics": []}),
    );
    assert!(assert_ok!(client.get_diagnostics(&file).await).is_empty());
    assert_eq!(handle.count("textDocument/didOpen"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_back_to_back_publishes_keep_the_latest() {
    let (dir, file) = workspace_with("main.py", "import os\n");
    let uri = uri_of(&file);

    let (transport, handle) = MockLspServer::new().start();
    let quick = ClientOptions {
        diagnostics_grace: Duration::from_millis(20),
        ..options()
    };
    let client = assert_ok!(LspClient::connect(transport, "python", dir.path(), quick).await);

    let stale = |message: &str| {
        json!({
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 6}},
            "severity": 2,
            "message": message
        })
    };

    for round in 0..50 {
        handle.notify(
            "textDocument/publishDiagnostics",
            json!({"uri": uri, "diagnostics": [stale("old-1"), stale("old-2")]}),
        );
        handle.notify(
            "textDocument/publishDiagnostics",
            json!({"uri": uri, "diagnostics": []}),
        );

        let diagnostics = assert_ok!(client.get_diagnostics(&file).await);
        let messages: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.is_empty(), "round {}: stale diagnostics {:?}", round, messages);
    }
}

#[tokio::test]
async fn test_hierarchical_symbols_carry_file() {
    let (dir, file) = workspace_with("server.go", "package server\n");
    let server = MockLspServer::new().on_request_simple(
        "textDocument/documentSymbol",
        json!([{
            "name": "Server",
            "kind": 23,
            "range": {"start": {"line": 2, "character": 0}, "end": {"line": 9, "character": 1}},
            "selectionRange": {"start": {"line": 2, "character": 5}, "end": {"line": 2, "character": 11}},
            "children": [{
                "name": "Run",
                "kind": 6,
                "range": {"start": {"line": 4, "character": 0}, "end": {"line": 8, "character": 1}},
                "selectionRange": {"start": {"line": 4, "character": 16}, "end": {"line": 4, "character": 19}}
            }]
        }]),
    );
    let (transport, _handle) = server.start();
    let client = assert_ok!(LspClient::connect(transport, "go", dir.path(), options()).await);

    let symbols = assert_ok!(client.document_symbols(&file).await);
    assert_eq!(symbols.len(), 2);
    for symbol in &symbols {
        assert_eq!(PathBuf::from(&symbol.file), file);
    }
    assert_eq!(symbols[1].name, "Run");
    assert_eq!(symbols[1].container.as_deref(), Some("Server"));
}

#[tokio::test]
async fn test_workspace_symbols_need_no_open_file() {
    let server = MockLspServer::new().on_request_simple(
        "workspace/symbol",
        json!([{
            "name": "Handler",
            "kind": 11,
            "location": {
                "uri": "file:///work/api/handler.go",
                "range": {"start": {"line": 7, "character": 5}, "end": {"line": 7, "character": 12}}
            }
        }]),
    );
    let (transport, handle) = server.start();
    let client = assert_ok!(
        LspClient::connect(transport, "go", &std::env::temp_dir(), options()).await
    );

    let symbols = assert_ok!(client.workspace_symbols("Handl").await);
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].kind, "interface");
    assert_eq!(symbols[0].file, "/work/api/handler.go");
    assert_eq!(handle.count("textDocument/didOpen"), 0);
    assert_eq!(handle.params_of("workspace/symbol").unwrap()["query"], "Handl");
}

#[tokio::test]
async fn test_server_error_surfaces_with_code() {
    let (dir, file) = workspace_with("main.c", "int main(void) { return 0; }\n");
    let (transport, _handle) = MockLspServer::new().start();
    let client = assert_ok!(LspClient::connect(transport, "c", dir.path(), options()).await);

    // The mock has no hover handler.
    let err = assert_err!(client.hover(&file, 1, 5).await);
    assert!(matches!(err, LspError::Protocol { code: -32601, .. }));
    assert!(err
        .to_string()
        .starts_with("textDocument/hover failed: server error -32601"));
    assert!(client.is_ready());
}

#[tokio::test]
async fn test_request_timeout_keeps_client_usable() {
    let (dir, file) = workspace_with("main.rs", "fn main() {}\n");
    let server = MockLspServer::new()
        .on_request_simple("textDocument/hover", json!(null))
        .on_request_simple("textDocument/definition", json!([]))
        .with_delay("textDocument/hover", Duration::from_secs(5));
    let (transport, _handle) = server.start();
    let client = assert_ok!(
        LspClient::connect(
            transport,
            "rust",
            dir.path(),
            ClientOptions {
                request_timeout: Duration::from_millis(100),
                ..options()
            },
        )
        .await
    );

    let err = assert_err!(client.hover(&file, 1, 4).await);
    assert!(matches!(err, LspError::Timeout { .. }));
    assert!(assert_ok!(client.definition(&file, 1, 4).await).is_empty());
}

#[tokio::test]
async fn test_server_exit_marks_client_not_ready() {
    let (transport, handle) = MockLspServer::new().start();
    let client = assert_ok!(
        LspClient::connect(transport, "lua", &std::env::temp_dir(), options()).await
    );
    assert!(client.is_ready());

    drop(handle);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!client.is_ready());
    assert!(matches!(
        client.workspace_symbols("").await,
        Err(LspError::TransportClosed)
    ));
    assert_ok!(client.close().await);
}

#[tokio::test]
async fn test_close_sends_shutdown_then_exit() {
    let (transport, handle) = MockLspServer::new().start();
    let client = assert_ok!(
        LspClient::connect(transport, "zig", &std::env::temp_dir(), options()).await
    );

    assert_ok!(client.close().await);
    assert!(handle.wait_for("exit", Duration::from_secs(1)).await);

    let tail: Vec<String> = handle
        .received()
        .into_iter()
        .filter_map(|message| match message {
            Message::Request(request) => Some(request.method),
            Message::Notification(notification) => Some(notification.method),
            Message::Response(_) => None,
        })
        .rev()
        .take(2)
        .collect();
    assert_eq!(tail, vec!["exit".to_string(), "shutdown".to_string()]);
}
