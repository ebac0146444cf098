//! Request/reply behavior over the in-process loopback transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use courier::prelude::*;

/// A listener whose peers echo the request with `"op"` rewritten.
async fn echo_service(transport: &Transport, name: &str) -> Connection {
    let listener = Connection::listen(transport, name, None).await.unwrap();
    listener.set_listener_handler(|peer| {
        let replier = peer.clone();
        peer.set_event_handler(move |msg| {
            if let Some(mut reply) = Value::dictionary_create_reply(msg.value()) {
                let op = msg.value().dict_get_string("op").unwrap_or("?").to_string();
                reply.dict_set_string("op", format!("{}-ack", op)).unwrap();
                replier.send_reply(&msg, reply);
            }
        });
        peer.resume();
    });
    listener.resume();
    listener
}

#[tokio::test(flavor = "multi_thread")]
async fn request_reply_roundtrip() {
    let transport = Transport::mem();
    let _listener = echo_service(&transport, "test.echo").await;

    let client = Connection::connect(&transport, "test.echo", None)
        .await
        .unwrap();
    client.resume();

    let mut ping = Value::dictionary();
    ping.dict_set_string("op", "ping").unwrap();

    let reply = timeout(Duration::from_secs(5), client.send_with_reply_await(ping))
        .await
        .unwrap();
    assert_eq!(reply.dict_get_string("op"), Ok("ping-ack"));
    assert!(reply.is_from_wire());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_replies_route_by_sequence_id() {
    let transport = Transport::mem();
    let _listener = echo_service(&transport, "test.multi").await;

    let client = Connection::connect(&transport, "test.multi", None)
        .await
        .unwrap();
    client.resume();

    let mut handles = Vec::new();
    for i in 0..32 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let mut req = Value::dictionary();
            req.dict_set_string("op", format!("req{}", i)).unwrap();
            let reply = client.send_with_reply_await(req).await;
            assert_eq!(
                reply.dict_get_string("op").unwrap(),
                format!("req{}-ack", i)
            );
        }));
    }
    for handle in handles {
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn replies_never_reach_the_event_handler() {
    let transport = Transport::mem();
    let _listener = echo_service(&transport, "test.routing").await;

    let client = Connection::connect(&transport, "test.routing", None)
        .await
        .unwrap();
    let stray_events = Arc::new(AtomicUsize::new(0));
    let counter = stray_events.clone();
    client.set_event_handler(move |msg| {
        if !msg.value().is_error_code(ErrorCode::ConnectionInvalid) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    client.resume();

    for _ in 0..8 {
        let mut req = Value::dictionary();
        req.dict_set_string("op", "check").unwrap();
        let reply = client.send_with_reply_await(req).await;
        assert_eq!(reply.dict_get_string("op"), Ok("check-ack"));
    }
    assert_eq!(stray_events.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_sends_arrive_in_order() {
    let transport = Transport::mem();
    let listener = Connection::listen(&transport, "test.order", None)
        .await
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let done_tx = Arc::new(Mutex::new(Some(done_tx)));
    {
        let received = received.clone();
        listener.set_listener_handler(move |peer| {
            let received = received.clone();
            let done_tx = done_tx.clone();
            peer.set_event_handler(move |msg| {
                if let Ok(n) = msg.value().dict_get_uint64("n") {
                    let mut log = received.lock();
                    log.push(n);
                    if log.len() == 50 {
                        if let Some(tx) = done_tx.lock().take() {
                            let _ = tx.send(());
                        }
                    }
                }
            });
            peer.resume();
        });
    }
    listener.resume();

    let client = Connection::connect(&transport, "test.order", None)
        .await
        .unwrap();
    client.resume();
    for n in 0..50u64 {
        let mut msg = Value::dictionary();
        msg.dict_set_uint64("n", n).unwrap();
        client.send(msg);
    }

    timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
    let log = received.lock();
    assert_eq!(&*log, &(0..50).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn send_barrier_runs_after_prior_sends() {
    let transport = Transport::mem();
    let _listener = echo_service(&transport, "test.barrier").await;

    let client = Connection::connect(&transport, "test.barrier", None)
        .await
        .unwrap();
    client.resume();

    for _ in 0..10 {
        let mut msg = Value::dictionary();
        msg.dict_set_string("op", "fire").unwrap();
        client.send(msg);
    }

    let (tx, rx) = tokio::sync::oneshot::channel();
    client.send_barrier(move || {
        let _ = tx.send(());
    });
    timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_completes_pending_with_interrupted() {
    let transport = Transport::mem();
    // A listener that never replies.
    let listener = Connection::listen(&transport, "test.mute", None)
        .await
        .unwrap();
    listener.set_listener_handler(|peer| {
        peer.set_event_handler(|_| {});
        peer.resume();
    });
    listener.resume();

    let client = Connection::connect(&transport, "test.mute", None)
        .await
        .unwrap();
    client.resume();

    let mut req = Value::dictionary();
    req.dict_set_string("op", "void").unwrap();
    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.send_with_reply_await(req).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.cancel();

    let reply = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    assert!(reply.is_error_code(ErrorCode::ConnectionInterrupted));
}

#[tokio::test(flavor = "multi_thread")]
async fn suspended_client_buffers_until_resume() {
    let transport = Transport::mem();
    let _listener = echo_service(&transport, "test.suspend").await;

    let client = Connection::connect(&transport, "test.suspend", None)
        .await
        .unwrap();
    client.resume();
    client.suspend();

    let mut req = Value::dictionary();
    req.dict_set_string("op", "later").unwrap();
    let reply_fut = {
        let client = client.clone();
        tokio::spawn(async move { client.send_with_reply_await(req).await })
    };

    // The reply sits in the transport while the connection is suspended.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!reply_fut.is_finished());

    client.resume();
    let reply = timeout(Duration::from_secs(5), reply_fut).await.unwrap().unwrap();
    assert_eq!(reply.dict_get_string("op"), Ok("later-ack"));
}
