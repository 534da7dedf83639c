//! Node RPC surface tests
//!
//! Drives the real TCP listener: swarm ping and query, order submission into
//! the fragment fan-out, status, and the wire-level compute-stream handshake
//! with greeting verification.

use std::sync::Arc;
use std::time::Duration;

use dispatch::{shutdown_channel, Shutdown};
use router::client::TcpStreamClient;
use router::rpc::{RpcRequest, RpcResponse};
use router::service::{call, FragmentDecrypter, NodeService};
use router::{Router, RouterError, Swarm};
use stream::connector::StreamConnector;
use stream::recycler::StreamRecycler;
use stream::streamer::{StreamClient, StreamServer, Streamer};
use stream::{Stream, StreamMessage};
use types::identity::{Keypair, MultiAddress};
use types::order::{
    CoExpShare, EncryptedCoExpShare, EncryptedFragment, Fragment, FragmentId, OrderId, OrderType,
    Parity,
};

/// Test decrypter: shares decode as little-endian u64s.
struct TestDecrypter;

impl FragmentDecrypter for TestDecrypter {
    fn decrypt(&self, fragment: &EncryptedFragment) -> Result<Fragment, RouterError> {
        let share = |share: &EncryptedCoExpShare| -> Result<CoExpShare, RouterError> {
            let co = share
                .co
                .clone()
                .try_into()
                .map(u64::from_le_bytes)
                .map_err(|_| RouterError::Decrypt("bad co share".into()))?;
            let exp = share
                .exp
                .clone()
                .try_into()
                .map(u64::from_le_bytes)
                .map_err(|_| RouterError::Decrypt("bad exp share".into()))?;
            Ok(CoExpShare { co, exp })
        };
        Ok(Fragment {
            order_id: fragment.order_id,
            order_type: fragment.order_type,
            order_parity: fragment.order_parity,
            order_expiry: fragment.order_expiry,
            id: fragment.id,
            tokens: CoExpShare { co: 0, exp: 0 },
            price: share(&fragment.price)?,
            volume: share(&fragment.volume)?,
            minimum_volume: share(&fragment.minimum_volume)?,
            nonce: 0,
        })
    }
}

fn encrypted_share(co: u64, exp: u64) -> EncryptedCoExpShare {
    EncryptedCoExpShare {
        co: co.to_le_bytes().to_vec(),
        exp: exp.to_le_bytes().to_vec(),
    }
}

fn encrypted_fragment(parity: Parity) -> EncryptedFragment {
    EncryptedFragment {
        order_id: OrderId::random(),
        order_type: OrderType::Limit,
        order_parity: parity,
        order_expiry: 1_900_000_000,
        id: FragmentId::random(),
        tokens: vec![0u8; 8],
        price: encrypted_share(10, 1),
        volume: encrypted_share(20, 1),
        minimum_volume: encrypted_share(5, 1),
        nonce: vec![0u8; 8],
    }
}

/// A full node on localhost: listener, swarm, router, connector.
struct LiveNode {
    keypair: Arc<Keypair>,
    multi_address: MultiAddress,
    service: Arc<NodeService>,
}

fn live_node(shutdown: Shutdown, port: u16) -> LiveNode {
    let keypair = Arc::new(Keypair::generate());
    let multi_address = keypair.multi_address("127.0.0.1", port);
    let connector = Arc::new(StreamConnector::new(multi_address.address()));
    let client = Arc::new(TcpStreamClient::new(
        Arc::clone(&keypair),
        multi_address.clone(),
    ));
    let streamer = Streamer::new(
        multi_address.address(),
        client as Arc<dyn StreamClient>,
        Arc::clone(&connector) as Arc<dyn StreamServer>,
    );
    let router = Arc::new(Router::new(
        64,
        multi_address.clone(),
        StreamRecycler::new(streamer),
    ));
    let swarm = Arc::new(Swarm::new(Arc::clone(&keypair), multi_address.clone()));
    let service = Arc::new(NodeService::new(
        router,
        swarm,
        connector,
        Arc::new(TestDecrypter),
    ));
    let _errs = Arc::clone(&service).run(shutdown, "127.0.0.1".to_string(), port);
    LiveNode {
        keypair,
        multi_address,
        service,
    }
}

async fn wait_for_listener(remote: &MultiAddress) {
    for _ in 0..100 {
        if call(remote, &RpcRequest::Status).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener never came up at {}", remote);
}

#[tokio::test]
async fn test_ping_records_peer_and_returns_pong() {
    let (_handle, shutdown) = shutdown_channel();
    let server = live_node(shutdown.clone(), 48211);
    let client = live_node(shutdown, 48212);
    wait_for_listener(&server.multi_address).await;

    let ping = RpcRequest::Ping(client.service.swarm().signed_multi_address());
    let response = call(&server.multi_address, &ping).await.unwrap();
    match response {
        RpcResponse::Pong(pong) => {
            assert_eq!(pong.multi_address, server.multi_address);
        }
        other => panic!("expected pong, got {:?}", other),
    }
    assert_eq!(server.service.swarm().peer_count(), 1);
}

#[tokio::test]
async fn test_status_reports_address_and_peers() {
    let (_handle, shutdown) = shutdown_channel();
    let server = live_node(shutdown, 48213);
    wait_for_listener(&server.multi_address).await;

    let response = call(&server.multi_address, &RpcRequest::Status).await.unwrap();
    match response {
        RpcResponse::Status(status) => {
            assert_eq!(status.address, server.multi_address.address());
            assert_eq!(status.peers, 0);
            assert!(!status.bootstrapped);
        }
        other => panic!("expected status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_open_order_reaches_fragment_subscribers() {
    let (_handle, shutdown) = shutdown_channel();
    let server = live_node(shutdown.clone(), 48214);
    let sender = live_node(shutdown.clone(), 48215);
    wait_for_listener(&server.multi_address).await;

    let (mut fragments, _errs) = server.service.router().order_fragments(shutdown);

    let fragment = encrypted_fragment(Parity::Buy);
    let request = RpcRequest::OpenOrder {
        from: sender.multi_address.clone(),
        fragment: fragment.clone(),
    };
    let response = call(&server.multi_address, &request).await.unwrap();
    assert_eq!(response, RpcResponse::FragmentAccepted);

    let received = tokio::time::timeout(Duration::from_secs(5), fragments.recv())
        .await
        .expect("fragment must be fanned out")
        .expect("fan-out must stay open");
    assert_eq!(received.order_id, fragment.order_id);
    assert_eq!(received.price, CoExpShare { co: 10, exp: 1 });
}

#[tokio::test]
async fn test_wire_handshake_authenticates_dialer() {
    let (_handle, shutdown) = shutdown_channel();
    let listener_node = live_node(shutdown.clone(), 48216);
    let dialer_node = live_node(shutdown.clone(), 48217);
    wait_for_listener(&listener_node.multi_address).await;

    // The dialer connects; the listener-side connector verifies the greeting
    // and hands the stream to `listen`.
    let client = TcpStreamClient::new(
        Arc::clone(&dialer_node.keypair),
        dialer_node.multi_address.clone(),
    );
    let dialed = client
        .connect(shutdown.clone(), &listener_node.multi_address)
        .await
        .unwrap();

    // The listener's connector verified the greeting; pick the stream up the
    // way the listener side of an arc would.
    let accepted = tokio::time::timeout(
        Duration::from_secs(5),
        listener_node
            .service
            .connector()
            .listen(shutdown.clone(), dialer_node.multi_address.address()),
    )
    .await
    .expect("handshake must complete")
    .unwrap();

    dialed.send(&StreamMessage::data(vec![5])).await.unwrap();
    assert_eq!(accepted.recv().await.unwrap().data, vec![5]);
}
