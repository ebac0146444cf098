//! End-to-end request/reply, credentials, and fd passing over the unix
//! seq-packet transport.

use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::timeout;

use courier::prelude::*;

fn temp_transport(tag: &str) -> Transport {
    // RUST_LOG=courier=trace surfaces the pipe/transport diagnostics.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "courier-e2e-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    Transport::unix_at(dir)
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_pong_with_credentials() {
    let transport = temp_transport("pingpong");
    let listener = Connection::listen(&transport, "test.svc", None)
        .await
        .unwrap();

    let seen_creds = Arc::new(parking_lot::Mutex::new(None));
    {
        let seen_creds = seen_creds.clone();
        listener.set_listener_handler(move |peer| {
            let seen_creds = seen_creds.clone();
            let replier = peer.clone();
            peer.set_event_handler(move |msg| {
                if msg.value().is_error_code(ErrorCode::ConnectionInvalid) {
                    return;
                }
                *seen_creds.lock() = Some(msg.credentials());
                assert_eq!(msg.value().dict_get_string("op"), Ok("ping"));
                if let Some(mut reply) = Value::dictionary_create_reply(msg.value()) {
                    reply.dict_set_string("op", "pong").unwrap();
                    replier.send_reply(&msg, reply);
                }
            });
            peer.resume();
        });
    }
    listener.resume();

    let client = Connection::connect(&transport, "test.svc", None)
        .await
        .unwrap();
    client.resume();

    let mut ping = Value::dictionary();
    ping.dict_set_string("op", "ping").unwrap();
    let reply = timeout(Duration::from_secs(5), client.send_with_reply_await(ping))
        .await
        .unwrap();

    assert_eq!(reply.dict_get_string("op"), Ok("pong"));

    let credentials = seen_creds.lock().unwrap();
    assert_eq!(credentials.pid, std::process::id() as i32);
    assert_eq!(credentials, Credentials::current());
}

#[tokio::test(flavor = "multi_thread")]
async fn fd_passing_transfers_a_live_descriptor() {
    let transport = temp_transport("fdpass");
    let listener = Connection::listen(&transport, "fd.svc", None).await.unwrap();

    let (byte_tx, byte_rx) = tokio::sync::oneshot::channel();
    let byte_tx = Arc::new(parking_lot::Mutex::new(Some(byte_tx)));
    listener.set_listener_handler(move |peer| {
        let byte_tx = byte_tx.clone();
        peer.set_event_handler(move |msg| {
            if msg.value().is_error_code(ErrorCode::ConnectionInvalid) {
                return;
            }
            let fd = msg
                .value()
                .dict_get("file")
                .unwrap()
                .take_fd()
                .unwrap()
                .expect("fd attached");
            let mut file = std::fs::File::from(fd);
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte).unwrap();
            if let Some(tx) = byte_tx.lock().take() {
                let _ = tx.send(byte[0]);
            }
        });
        peer.resume();
    });
    listener.resume();

    let client = Connection::connect(&transport, "fd.svc", None).await.unwrap();
    client.resume();

    let (read_end, mut write_end) = std::io::pipe().unwrap();
    write_end.write_all(b"Q").unwrap();

    // Transfer a duplicate; our end of the pipe stays usable.
    let dup: OwnedFd = read_end.try_clone().unwrap().into();
    let mut msg = Value::dictionary();
    msg.dict_set("file", Value::fd(dup)).unwrap();
    client.send(msg);

    let byte = timeout(Duration::from_secs(5), byte_rx).await.unwrap().unwrap();
    assert_eq!(byte, b'Q');

    // The original read end still works: write another byte and read it
    // back locally.
    let mut original = std::fs::File::from(OwnedFd::from(read_end));
    write_end.write_all(b"R").unwrap();
    let mut byte = [0u8; 1];
    original.read_exact(&mut byte).unwrap();
    assert_eq!(&byte, b"R");
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_close_delivers_invalid_exactly_once() {
    let transport = temp_transport("teardown");
    let listener = Connection::listen(&transport, "bye.svc", None)
        .await
        .unwrap();

    let invalid_events = Arc::new(AtomicUsize::new(0));
    {
        let invalid_events = invalid_events.clone();
        listener.set_listener_handler(move |peer| {
            let invalid_events = invalid_events.clone();
            peer.set_event_handler(move |msg| {
                if msg.value().is_error_code(ErrorCode::ConnectionInvalid) {
                    invalid_events.fetch_add(1, Ordering::SeqCst);
                }
            });
            peer.resume();
        });
    }
    listener.resume();

    let client = Connection::connect(&transport, "bye.svc", None)
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

    timeout(Duration::from_secs(5), async {
        while invalid_events.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invalid_events.load(Ordering::SeqCst), 1);
    assert_eq!(listener.peer_count(), 0);
}
