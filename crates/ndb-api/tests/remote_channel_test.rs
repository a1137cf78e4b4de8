#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use ndb_api::errno::{EEXIST, EOPNOTSUPP};
use ndb_api::{Attrs, Channel, Error, Kind, MemoryChannel, Namespace, RemoteChannel, Request, remote};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

/// Remote client wired to a server over an in-memory pipe.
fn pair(ns: &Namespace) -> (RemoteChannel, CancellationToken) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let served: Arc<dyn Channel> = Arc::new(MemoryChannel::attach(ns));
    tokio::spawn(remote::serve(served, server_io, cancel.clone()));
    (RemoteChannel::from_stream(client_io, "remote test"), cancel)
}

fn dummy(name: &str) -> Request {
    Request::create(
        Kind::Interface,
        Attrs::new().with("ifname", name).with("kind", "dummy"),
    )
}

#[tokio::test]
async fn dump_matches_the_served_namespace() {
    let ns = Namespace::new("ns");
    let (remote, _cancel) = pair(&ns);

    let dumped = remote.dump().await.unwrap();
    assert_eq!(dumped, ns.snapshot());
}

#[tokio::test]
async fn requests_round_trip_with_realized_attrs() {
    let ns = Namespace::new("ns");
    let (remote, _cancel) = pair(&ns);

    let realized = remote.request(dummy("d0")).await.unwrap();
    assert_eq!(realized.get_str("state"), Some("down"));
    assert_eq!(ns.link_index("d0"), realized.get_int("index"));
}

#[tokio::test]
async fn rejections_keep_the_origin_errno() {
    let ns = Namespace::new("ns");
    let (remote, _cancel) = pair(&ns);

    remote.request(dummy("d0")).await.unwrap();
    let dup = remote.request(dummy("d0")).await.unwrap_err();
    assert_eq!(dup.code(), Some(EEXIST));

    let unsupported = remote
        .request(Request::create(
            Kind::Interface,
            Attrs::new().with("ifname", "x").with("kind", "wireguard"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(unsupported, Error::Rejected { code: EOPNOTSUPP, .. }));
}

#[tokio::test]
async fn open_forwards_live_events() {
    let ns = Namespace::new("ns");
    let (remote, _cancel) = pair(&ns);
    let mut events = remote.open().await.unwrap();

    // A change made by someone else on the namespace still reaches the client.
    MemoryChannel::attach(&ns).request(dummy("d1")).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, Kind::Interface);
    assert_eq!(event.attrs.get_str("ifname"), Some("d1"));
}

#[tokio::test]
async fn lost_events_reach_the_client_as_lagged() {
    let ns = Namespace::with_event_buffer("ns", 2);
    let (remote, _cancel) = pair(&ns);
    let mut events = remote.open().await.unwrap();

    // No await in between: the server cannot drain its stream in time.
    for name in ["d0", "d1", "d2", "d3"] {
        ns.execute(&dummy(name)).unwrap();
    }

    let first = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, Err(Error::Lagged { skipped: 2 })));
    let next = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(next.attrs.get_str("ifname"), Some("d2"));
}

#[tokio::test]
async fn concurrent_calls_are_multiplexed() {
    let ns = Namespace::new("ns");
    let (remote, _cancel) = pair(&ns);

    let (a, b, c) = tokio::join!(
        remote.request(dummy("a")),
        remote.request(dummy("b")),
        remote.dump(),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(!c.unwrap().is_empty());
}

#[tokio::test]
async fn close_fails_later_calls() {
    let ns = Namespace::new("ns");
    let (remote, _cancel) = pair(&ns);

    remote.close().await.unwrap();
    assert!(matches!(remote.dump().await, Err(Error::Closed)));
    // Closing the proxy leaves the namespace alone.
    assert_eq!(ns.link_index("lo"), Some(1));
}

#[tokio::test]
async fn server_shutdown_surfaces_as_closed() {
    let ns = Namespace::new("ns");
    let (remote, cancel) = pair(&ns);
    remote.dump().await.unwrap();

    cancel.cancel();
    let err = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match remote.dump().await {
                Err(e) => break e,
                Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(err, Error::Closed));
}
