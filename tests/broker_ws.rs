//! End-to-end tests: a real server driven by WebSocket evaluators and an
//! HTTP caller.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use eval_broker::api::build_app;
use eval_broker::app_state::AppState;
use eval_broker::store::LanguageStore;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server(eval_timeout: Duration) -> SocketAddr {
    let state = AppState::new(Arc::new(LanguageStore::in_memory()), eval_timeout, 64);
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, build_app(state)).await;
    });
    addr
}

async fn post_json(addr: SocketAddr, path: &str, body: Value) -> (u16, Value) {
    let Ok(resp) = reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .json(&body)
        .send()
        .await
    else {
        panic!("POST {path} failed");
    };
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn get_json(addr: SocketAddr, path: &str) -> Value {
    let Ok(resp) = reqwest::get(format!("http://{addr}{path}")).await else {
        panic!("GET {path} failed");
    };
    let Ok(body) = resp.json::<Value>().await else {
        panic!("GET {path} returned no JSON");
    };
    body
}

async fn issue_key(addr: SocketAddr, owner_id: u64, name: &str) -> Value {
    let (status, body) = post_json(
        addr,
        "/api/v1/languages",
        json!({ "owner_id": owner_id, "name": name }),
    )
    .await;
    assert_eq!(status, 201, "issue_key: {body}");
    body
}

async fn key_for(addr: SocketAddr, owner_id: u64, name: &str) -> String {
    let body = issue_key(addr, owner_id, name).await;
    let Some(key) = body["key"].as_str() else {
        panic!("no key in {body}");
    };
    key.to_string()
}

async fn connect(addr: SocketAddr) -> Ws {
    let Ok((ws, _)) = connect_async(format!("ws://{addr}/ws")).await else {
        panic!("websocket connect failed");
    };
    ws
}

async fn send_json(ws: &mut Ws, frame: Value) {
    if ws.send(Message::text(frame.to_string())).await.is_err() {
        panic!("send failed");
    }
}

/// Next text frame as JSON, or `None` once the server closes the socket.
async fn recv_json(ws: &mut Ws) -> Option<Value> {
    loop {
        let Ok(next) = tokio::time::timeout(RECV_TIMEOUT, ws.next()).await else {
            panic!("timed out waiting for a frame");
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                let Ok(value) = serde_json::from_str(text.as_str()) else {
                    panic!("server sent non-JSON: {text}");
                };
                return Some(value);
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => {}
        }
    }
}

async fn expect_frame(ws: &mut Ws) -> Value {
    let Some(frame) = recv_json(ws).await else {
        panic!("socket closed unexpectedly");
    };
    frame
}

fn register_frame(id: &str, key: &str) -> Value {
    json!({ "id": id, "version": 0, "side": "CLIENT", "kind": "REGISTER", "key": key })
}

fn result_frame(id: &str, key: &str, stdout: &str) -> Value {
    json!({
        "id": id, "version": 0, "side": "CLIENT", "kind": "RESULT", "key": key,
        "success": true, "exit_code": 0, "stdout": stdout
    })
}

async fn registered_evaluator(addr: SocketAddr, key: &str) -> Ws {
    let mut ws = connect(addr).await;
    send_json(&mut ws, register_frame("reg", key)).await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "SERVEROK", "register: {reply}");
    assert_eq!(reply["id"], "reg");
    assert_eq!(reply["side"], "SERVER");
    ws
}

#[tokio::test]
async fn eval_round_trip_through_registered_evaluator() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let key = key_for(addr, 1, "echolang").await;
    let mut ws = registered_evaluator(addr, &key).await;

    let evaluator = async {
        let request = expect_frame(&mut ws).await;
        assert_eq!(request["kind"], "EVALUATE");
        assert_eq!(request["code"], "print hi");
        let Some(id) = request["id"].as_str() else {
            panic!("EVALUATE without id");
        };
        send_json(&mut ws, result_frame(id, &key, "hi")).await;
    };
    let caller = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "echolang", "code": "print hi" }),
    );
    let ((), (status, body)) = tokio::join!(evaluator, caller);

    assert_eq!(status, 200, "eval: {body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["stdout"], "hi");
    assert_eq!(body["exit_code"], 0);
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn messages_before_registration_are_invalid() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let key = key_for(addr, 1, "somelang").await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, result_frame("x1", &key, "hi")).await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "INVALID");
    assert_eq!(reply["id"], "x1");
    assert_eq!(reply["error"], "Client needs to be registered first");

    send_json(&mut ws, register_frame("r1", "not-a-key")).await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "INVALID");
    assert_eq!(
        reply["error"],
        "Invalid key. Request a new one and register again"
    );

    // The connection stays usable after errors.
    send_json(&mut ws, register_frame("r2", &key)).await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "SERVEROK");

    send_json(&mut ws, register_frame("r3", &key)).await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["error"], "Already registered");
}

#[tokio::test]
async fn malformed_frames_are_answered_with_invalid() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let mut ws = connect(addr).await;

    if ws.send(Message::text("{not json".to_string())).await.is_err() {
        panic!("send failed");
    }
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "INVALID");
    assert_eq!(reply["id"], "");

    send_json(
        &mut ws,
        json!({ "id": "v9", "version": 9, "side": "CLIENT", "kind": "REGISTER", "key": "k" }),
    )
    .await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "INVALID");
    assert_eq!(reply["id"], "v9");

    send_json(
        &mut ws,
        json!({ "id": "s1", "version": 0, "side": "SERVER", "kind": "SERVEROK" }),
    )
    .await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "INVALID");
    assert_eq!(reply["id"], "s1");
}

#[tokio::test]
async fn racing_registrations_bind_exactly_one_connection() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let key = key_for(addr, 1, "racelang").await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    let (ra, rb) = tokio::join!(
        async {
            send_json(&mut a, register_frame("a", &key)).await;
            expect_frame(&mut a).await
        },
        async {
            send_json(&mut b, register_frame("b", &key)).await;
            expect_frame(&mut b).await
        }
    );

    let mut kinds = [ra["kind"].clone(), rb["kind"].clone()];
    kinds.sort_by_key(ToString::to_string);
    assert_eq!(kinds, [json!("INVALID"), json!("SERVEROK")]);
    let loser = if ra["kind"] == "INVALID" { &ra } else { &rb };
    assert_eq!(
        loser["error"],
        "Client already logged in. Request a new key to invalidate that session"
    );

    let sessions = get_json(addr, "/api/v1/sessions").await;
    assert_eq!(sessions["total"], 1);
}

#[tokio::test]
async fn timeout_notifies_evaluator_and_late_reply_is_unmatched() {
    let addr = spawn_server(Duration::from_millis(300)).await;
    let key = key_for(addr, 1, "slowlang").await;
    let mut ws = registered_evaluator(addr, &key).await;

    let (status, body) = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "slowlang", "code": "sleep" }),
    )
    .await;
    assert_eq!(status, 504, "eval: {body}");

    let request = expect_frame(&mut ws).await;
    assert_eq!(request["kind"], "EVALUATE");
    let notice = expect_frame(&mut ws).await;
    assert_eq!(notice["kind"], "TIMEOUT");
    assert_eq!(notice["id"], request["id"]);

    let Some(id) = request["id"].as_str() else {
        panic!("EVALUATE without id");
    };
    send_json(&mut ws, result_frame(id, &key, "too late")).await;
    let reply = expect_frame(&mut ws).await;
    assert_eq!(reply["kind"], "INVALID");
    assert_eq!(reply["id"], id);
    assert_eq!(reply["error"], "No active conversation with that id");
}

#[tokio::test]
async fn evaluator_disconnect_fails_pending_eval() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let key = key_for(addr, 1, "droplang").await;
    let mut ws = registered_evaluator(addr, &key).await;

    let evaluator = async move {
        let request = expect_frame(&mut ws).await;
        assert_eq!(request["kind"], "EVALUATE");
        let _ = ws.close(None).await;
    };
    let caller = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "droplang", "code": "x" }),
    );
    let ((), (status, body)) = tokio::join!(evaluator, caller);
    assert_eq!(status, 502, "eval: {body}");

    let (status, _) = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "droplang", "code": "x" }),
    )
    .await;
    assert_eq!(status, 503);
}

#[tokio::test]
async fn unknown_and_offline_languages() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let (status, body) = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "nolang", "code": "x" }),
    )
    .await;
    assert_eq!(status, 404);
    assert!(body["error"]["code"].is_number());

    let _ = key_for(addr, 1, "idlelang").await;
    let (status, _) = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "idlelang", "code": "x" }),
    )
    .await;
    assert_eq!(status, 503);
}

#[tokio::test]
async fn reissued_key_evicts_session_and_invalidates_old_key() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let old_key = key_for(addr, 7, "mylang").await;
    let mut ws = registered_evaluator(addr, &old_key).await;

    let body = issue_key(addr, 7, "mylang").await;
    assert_eq!(body["replaced"], true);
    assert_eq!(body["evicted"], true);
    assert_ne!(body["key"], old_key.as_str());

    assert!(recv_json(&mut ws).await.is_none(), "evicted socket stays open");

    let mut retry = connect(addr).await;
    send_json(&mut retry, register_frame("again", &old_key)).await;
    let reply = expect_frame(&mut retry).await;
    assert_eq!(reply["kind"], "INVALID");

    let Some(new_key) = body["key"].as_str() else {
        panic!("no key in {body}");
    };
    let _fresh = registered_evaluator(addr, new_key).await;
}

#[tokio::test]
async fn sessions_endpoint_lists_and_evicts() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let key = key_for(addr, 3, "listlang").await;
    let mut ws = registered_evaluator(addr, &key).await;

    let sessions = get_json(addr, "/api/v1/sessions").await;
    assert_eq!(sessions["total"], 1);
    assert_eq!(sessions["data"][0]["name"], "listlang");
    assert_eq!(sessions["data"][0]["owner_id"], 3);

    let health = get_json(addr, "/health").await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["sessions"], 1);

    let client = reqwest::Client::new();
    let Ok(resp) = client
        .delete(format!("http://{addr}/api/v1/sessions/listlang"))
        .send()
        .await
    else {
        panic!("DELETE failed");
    };
    assert_eq!(resp.status().as_u16(), 204);
    assert!(recv_json(&mut ws).await.is_none());

    let Ok(resp) = client
        .delete(format!("http://{addr}/api/v1/sessions/nolang"))
        .send()
        .await
    else {
        panic!("DELETE failed");
    };
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn invalid_language_names_are_rejected() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let (status, _) = post_json(
        addr,
        "/api/v1/languages",
        json!({ "owner_id": 1, "name": "9lives" }),
    )
    .await;
    assert_eq!(status, 400);

    let _ = key_for(addr, 1, "taken").await;
    let (status, _) = post_json(
        addr,
        "/api/v1/languages",
        json!({ "owner_id": 2, "name": "taken" }),
    )
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn concurrent_evals_share_one_evaluator_out_of_order() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let key = key_for(addr, 1, "multilang").await;
    let mut ws = registered_evaluator(addr, &key).await;

    let evaluator = async {
        let mut pending = Vec::new();
        for _ in 0..2 {
            let request = expect_frame(&mut ws).await;
            assert_eq!(request["kind"], "EVALUATE");
            let (Some(id), Some(code)) = (request["id"].as_str(), request["code"].as_str()) else {
                panic!("bad EVALUATE: {request}");
            };
            pending.push((id.to_string(), code.to_string()));
        }
        assert_ne!(pending[0].0, pending[1].0);
        // Both requests are outstanding; answer the newest first.
        for (id, code) in pending.iter().rev() {
            send_json(&mut ws, result_frame(id, &key, code)).await;
        }
    };
    let first = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "multilang", "code": "alpha" }),
    );
    let second = post_json(
        addr,
        "/api/v1/eval",
        json!({ "language": "multilang", "code": "beta" }),
    );
    let ((), (s1, b1), (s2, b2)) = tokio::join!(evaluator, first, second);

    assert_eq!(s1, 200, "first: {b1}");
    assert_eq!(s2, 200, "second: {b2}");
    assert_eq!(b1["stdout"], "alpha");
    assert_eq!(b2["stdout"], "beta");
}

#[tokio::test]
async fn evict_stops_a_session_that_stopped_reading() {
    let addr = spawn_server(Duration::from_secs(5)).await;
    let key = key_for(addr, 1, "spam").await;
    let mut ws = registered_evaluator(addr, &key).await;

    // Every frame is answered with an INVALID echoing the long id. Nothing
    // reads them, so the server's outbound queue and socket fill up.
    let flood = json!({
        "id": "x".repeat(4096), "version": 0, "side": "CLIENT", "kind": "CLIENTOK", "key": key
    })
    .to_string();
    let flooder = tokio::spawn(async move {
        while ws.send(Message::text(flood.clone())).await.is_ok() {}
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let Ok(resp) = reqwest::Client::new()
        .delete(format!("http://{addr}/api/v1/sessions/spam"))
        .send()
        .await
    else {
        panic!("DELETE failed");
    };
    assert_eq!(resp.status().as_u16(), 204);

    let mut remaining = Value::Null;
    for _ in 0..50 {
        remaining = get_json(addr, "/api/v1/sessions").await["total"].clone();
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(remaining, 0, "evicted session is still registered");
    assert!(
        tokio::time::timeout(RECV_TIMEOUT, flooder).await.is_ok(),
        "evicted socket was never closed"
    );
}
