//! Listener fan-out and teardown behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::timeout;

use courier::prelude::*;

#[tokio::test(flavor = "multi_thread")]
async fn each_client_becomes_one_peer() {
    let transport = Transport::mem();
    let listener = Connection::listen(&transport, "fanout.svc", None)
        .await
        .unwrap();

    let peers_seen = Arc::new(AtomicUsize::new(0));
    {
        let peers_seen = peers_seen.clone();
        listener.set_listener_handler(move |peer| {
            peers_seen.fetch_add(1, Ordering::SeqCst);
            peer.set_event_handler(|_| {});
            peer.resume();
        });
    }
    listener.resume();

    let mut clients = Vec::new();
    for _ in 0..5 {
        let client = Connection::connect(&transport, "fanout.svc", None)
            .await
            .unwrap();
        client.resume();
        // A first message forces the connect to be observed.
        client.send(Value::dictionary());
        clients.push(client);
    }

    timeout(Duration::from_secs(5), async {
        while peers_seen.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(listener.peer_count(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_death_tears_down_the_peer_exactly_once() {
    let transport = Transport::mem();
    let listener = Connection::listen(&transport, "mortal.svc", None)
        .await
        .unwrap();

    let invalid_events = Arc::new(AtomicUsize::new(0));
    let (dead_tx, dead_rx) = tokio::sync::oneshot::channel::<()>();
    let dead_tx = Arc::new(parking_lot::Mutex::new(Some(dead_tx)));
    {
        let invalid_events = invalid_events.clone();
        listener.set_listener_handler(move |peer| {
            let invalid_events = invalid_events.clone();
            let dead_tx = dead_tx.clone();
            peer.set_event_handler(move |msg| {
                if msg.value().is_error_code(ErrorCode::ConnectionInvalid) {
                    invalid_events.fetch_add(1, Ordering::SeqCst);
                    if let Some(tx) = dead_tx.lock().take() {
                        let _ = tx.send(());
                    }
                }
            });
            peer.resume();
        });
    }
    listener.resume();

    let client = Connection::connect(&transport, "mortal.svc", None)
        .await
        .unwrap();
    client.resume();
    client.send(Value::dictionary());

    timeout(Duration::from_secs(5), async {
        while listener.peer_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    client.cancel();

    timeout(Duration::from_secs(5), dead_rx).await.unwrap().unwrap();
    // Give any erroneous duplicate a chance to land before counting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invalid_events.load(Ordering::SeqCst), 1);
    assert_eq!(listener.peer_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn listener_cancel_tears_down_children() {
    let transport = Transport::mem();
    let listener = Connection::listen(&transport, "doomed.svc", None)
        .await
        .unwrap();

    let child_deaths = Arc::new(AtomicUsize::new(0));
    {
        let child_deaths = child_deaths.clone();
        listener.set_listener_handler(move |peer| {
            let child_deaths = child_deaths.clone();
            peer.set_event_handler(move |msg| {
                if msg.value().is_error_code(ErrorCode::ConnectionInvalid) {
                    child_deaths.fetch_add(1, Ordering::SeqCst);
                }
            });
            peer.resume();
        });
    }
    listener.resume();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let client = Connection::connect(&transport, "doomed.svc", None)
            .await
            .unwrap();
        client.resume();
        client.send(Value::dictionary());
        clients.push(client);
    }

    timeout(Duration::from_secs(5), async {
        while listener.peer_count() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    listener.cancel();

    timeout(Duration::from_secs(5), async {
        while child_deaths.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // A new lookup finds nothing behind the cancelled listener.
    assert!(
        Connection::connect(&transport, "doomed.svc", None)
            .await
            .is_err()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_credentials_are_visible_to_the_service() {
    let transport = Transport::mem();
    let listener = Connection::listen(&transport, "creds.svc", None)
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
    listener.set_listener_handler(move |peer| {
        let tx = tx.clone();
        let creds_peer = peer.clone();
        peer.set_event_handler(move |msg| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send((msg.credentials(), creds_peer.remote_pid()));
            }
        });
        peer.resume();
    });
    listener.resume();

    let client = Connection::connect(&transport, "creds.svc", None)
        .await
        .unwrap();
    client.resume();
    client.send(Value::dictionary());

    let (credentials, remote_pid) =
        timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert_eq!(credentials, Credentials::current());
    assert_eq!(remote_pid, Some(std::process::id() as i32));
}

#[tokio::test(flavor = "multi_thread")]
async fn endpoint_value_re_resolves_to_the_service() {
    let transport = Transport::mem();
    let listener = Connection::listen(&transport, "ep.svc", None).await.unwrap();
    listener.set_listener_handler(|peer| {
        let replier = peer.clone();
        peer.set_event_handler(move |msg| {
            if let Some(mut reply) = Value::dictionary_create_reply(msg.value()) {
                reply.dict_set_bool("ok", true).unwrap();
                replier.send_reply(&msg, reply);
            }
        });
        peer.resume();
    });
    listener.resume();

    let endpoint = listener.endpoint().unwrap();
    assert_eq!(endpoint.value_type(), ValueType::Endpoint);

    let client = Connection::from_endpoint(&transport, &endpoint, None)
        .await
        .unwrap();
    client.resume();
    let reply = timeout(
        Duration::from_secs(5),
        client.send_with_reply_await(Value::dictionary()),
    )
    .await
    .unwrap();
    assert_eq!(reply.dict_get_bool("ok"), Ok(true));
}
