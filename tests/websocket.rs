//! End-to-end WebSocket scenarios.

use std::time::Duration;
use wharf::client::{ClientConfig, Controller};
use wharf::server::{RoutingContext, ServerConfig, ServerHandle};
use wharf::websocket::ConnectionState;
use wharf::{Message, Router};

async fn start(configure: impl FnOnce(&mut Router)) -> ServerHandle {
    let cfg = ServerConfig {
        port: 0,
        ..Default::default()
    };
    let mut ctx = RoutingContext::new(cfg).unwrap();
    configure(ctx.router_mut());
    ctx.start_on_current().await.unwrap()
}

fn ws_url(server: &ServerHandle, path: &str) -> String {
    format!("ws://127.0.0.1:{}{}", server.local_addr().port(), path)
}

fn client() -> Controller {
    Controller::new(ClientConfig::default()).unwrap()
}

#[tokio::test]
async fn echo_round_trip() {
    let server = start(|router| {
        router
            .add_websocket("/echo", |_head, conn| async move {
                while let Ok(msg) = conn.read().await {
                    if conn.send(msg.into_data()).await.is_err() {
                        break;
                    }
                }
            })
            .unwrap();
    })
    .await;

    let conn = client().ws_connect(&ws_url(&server, "/echo")).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Active);

    conn.send("hello").await.unwrap();
    let msg = conn.read().await.unwrap();
    assert_eq!(msg, Message::Text("hello".to_owned()));

    conn.disconnect().await;
    server.shutdown().await;
}

#[tokio::test]
async fn websocket_endpoints_resolve_through_subrouters() {
    let server = start(|router| {
        let mut sub = Router::new();
        sub.add_websocket("/socket", |_head, conn| async move {
            let _ = conn.send("nested").await;
        })
        .unwrap();
        router.add_subrouter("/api", sub).unwrap();
    })
    .await;

    let conn = client()
        .ws_connect(&ws_url(&server, "/api/socket"))
        .await
        .unwrap();
    let msg = conn.read().await.unwrap();
    assert_eq!(msg.as_text(), Some("nested"));

    server.shutdown().await;
}

#[tokio::test]
async fn binary_mode_switches_the_frame_kind() {
    let server = start(|router| {
        router
            .add_websocket("/echo", |_head, conn| async move {
                while let Ok(msg) = conn.read().await {
                    conn.set_binary(matches!(msg, Message::Binary(_)));
                    if conn.send(msg.into_data()).await.is_err() {
                        break;
                    }
                }
            })
            .unwrap();
    })
    .await;

    let conn = client().ws_connect(&ws_url(&server, "/echo")).await.unwrap();

    conn.set_binary(true);
    conn.send(&b"\x00\x01\x02"[..]).await.unwrap();
    let msg = conn.read().await.unwrap();
    assert_eq!(msg, Message::Binary(bytes::Bytes::from_static(b"\x00\x01\x02")));

    conn.set_binary(false);
    conn.send("text again").await.unwrap();
    let msg = conn.read().await.unwrap();
    assert_eq!(msg.as_text(), Some("text again"));

    server.shutdown().await;
}

#[tokio::test]
async fn send_completions_fire_in_enqueue_order() {
    let server = start(|router| {
        router
            .add_websocket("/sink", |_head, conn| async move {
                // keep reading so the peer's writes drain
                while conn.read().await.is_ok() {}
            })
            .unwrap();
    })
    .await;

    let conn = client().ws_connect(&ws_url(&server, "/sink")).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for i in 0..8u32 {
        let tx = tx.clone();
        conn.send_with(format!("msg-{i}"), move |result| {
            result.unwrap();
            let _ = tx.send(i);
        });
    }
    drop(tx);

    let mut order = Vec::new();
    while let Some(i) = rx.recv().await {
        order.push(i);
    }
    assert_eq!(order, (0..8).collect::<Vec<_>>());

    conn.disconnect().await;
    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_resolves_pending_read_with_closed() {
    let server = start(|router| {
        router
            .add_websocket("/idle", |_head, conn| async move {
                // never send; just observe the close
                let _ = conn.read().await;
            })
            .unwrap();
    })
    .await;

    let conn = client().ws_connect(&ws_url(&server, "/idle")).await.unwrap();

    let reader = conn.clone();
    let pending = tokio::spawn(async move { reader.read().await });

    // let the read get in flight, then close
    tokio::time::sleep(Duration::from_millis(50)).await;
    conn.disconnect().await;

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending read must resolve")
        .unwrap();
    assert!(result.is_err());

    // further reads fail immediately; the state machine has reached its end
    assert!(conn.read().await.is_err());
    assert!(matches!(
        conn.state(),
        ConnectionState::Closing | ConnectionState::Closed
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn force_disconnect_drops_queued_work() {
    let server = start(|router| {
        router
            .add_websocket("/idle", |_head, conn| async move {
                while conn.read().await.is_ok() {}
            })
            .unwrap();
    })
    .await;

    let conn = client().ws_connect(&ws_url(&server, "/idle")).await.unwrap();

    let reader = conn.clone();
    let pending = tokio::spawn(async move { reader.read().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    conn.force_disconnect();

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("in-flight read must be released")
        .unwrap();
    assert!(result.is_err());
    assert!(conn.send("too late").await.is_err());

    server.shutdown().await;
}

#[tokio::test]
async fn upgrade_without_endpoint_is_refused() {
    let server = start(|_router| {}).await;

    let err = client().ws_connect(&ws_url(&server, "/nowhere")).await;
    assert!(err.is_err());

    server.shutdown().await;
}
