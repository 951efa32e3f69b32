//! End-to-end session tests against an in-process TCP board server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boardsync_client::{
    ActionOutcome, ConnectionObserver, ConnectionState, ConnectionStatus, CredentialToken,
    Session, SessionConfig, StateSubscription, StateUpdate, TcpTransport,
};
use boardsync_types::{
    Action, CorrelationId, Entity, EntityId, EntityKind, Envelope, EnvelopeKind, FrameBuffer,
    Hello, Mutation, Sequence, SnapshotBody,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const WAIT: Duration = Duration::from_secs(10);

// ===========================================
// Fake Board Server
// ===========================================

#[derive(Default)]
struct Board {
    sequence: u64,
    entities: Vec<Entity>,
    tokens: Vec<String>,
}

struct FakeServer {
    addr: SocketAddr,
    board: Arc<Mutex<Board>>,
    kick: Arc<Notify>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let board = Arc::new(Mutex::new(Board {
            sequence: 3,
            entities: vec![entity("seed/0-0")],
            tokens: Vec::new(),
        }));
        let kick = Arc::new(Notify::new());
        let connections = Arc::new(AtomicUsize::new(0));

        let server = Self {
            addr,
            board: Arc::clone(&board),
            kick: Arc::clone(&kick),
            connections: Arc::clone(&connections),
        };

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                connections.fetch_add(1, Ordering::SeqCst);
                serve(socket, Arc::clone(&board), Arc::clone(&kick)).await;
            }
        });
        server
    }

    fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Drop the current client connection.
    fn kick(&self) {
        self.kick.notify_one();
    }
}

async fn serve(mut socket: TcpStream, board: Arc<Mutex<Board>>, kick: Arc<Notify>) {
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = tokio::select! {
            read = socket.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
            _ = kick.notified() => return,
        };

        frames.extend(&buf[..n]);
        while let Some(frame) = frames.next_frame() {
            let Ok(envelope) = frame else { continue };
            for reply in respond(&envelope, &board) {
                if socket.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn respond(envelope: &Envelope, board: &Mutex<Board>) -> Vec<Vec<u8>> {
    let mut board = board.lock().unwrap();
    match envelope.kind() {
        EnvelopeKind::Hello => {
            let hello: Hello = envelope.body().unwrap();
            board.tokens.push(hello.token);
            vec![bare(EnvelopeKind::Ack, 0, None)]
        }
        EnvelopeKind::Snapshot => {
            let body = SnapshotBody {
                entities: board.entities.clone(),
            };
            vec![Envelope::with_body(EnvelopeKind::Snapshot, Sequence::new(board.sequence), None, &body)
                .unwrap()
                .to_frame()
                .unwrap()]
        }
        EnvelopeKind::Heartbeat => vec![bare(EnvelopeKind::Heartbeat, 0, None)],
        EnvelopeKind::Event => {
            let ack = bare(EnvelopeKind::Ack, 0, envelope.correlation_id());
            match envelope.body::<Action>() {
                Ok(Action::Add(added)) => {
                    board.sequence += 1;
                    board.entities.extend(added.iter().cloned());
                    let event = Envelope::with_body(
                        EnvelopeKind::Event,
                        Sequence::new(board.sequence),
                        None,
                        &Mutation::Add(added),
                    )
                    .unwrap()
                    .to_frame()
                    .unwrap();
                    vec![ack, event]
                }
                _ => vec![ack],
            }
        }
        _ => vec![],
    }
}

fn bare(kind: EnvelopeKind, sequence: u64, correlation_id: Option<CorrelationId>) -> Vec<u8> {
    Envelope::new(kind, Sequence::new(sequence), correlation_id, Vec::new())
        .to_frame()
        .unwrap()
}

fn entity(id: &str) -> Entity {
    Entity::new(
        EntityId::new(id),
        EntityKind::Line,
        r#"{"x1":0,"y1":0,"x2":10,"y2":10}"#,
        1_705_000_000_000,
    )
}

// ===========================================
// Helpers
// ===========================================

fn test_config() -> SessionConfig {
    SessionConfig::from_toml_str(
        r#"
        [reconnect]
        base_delay_ms = 20
        max_delay_ms = 200

        [heartbeat]
        interval_ms = 500
        "#,
    )
    .unwrap()
}

async fn wait_synced(observer: &mut ConnectionObserver) -> ConnectionStatus {
    wait_status(observer, |s| s.state.is_live() && !s.syncing).await
}

async fn wait_status<F>(observer: &mut ConnectionObserver, predicate: F) -> ConnectionStatus
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    tokio::time::timeout(WAIT, observer.wait_for(predicate))
        .await
        .expect("timed out waiting for connection status")
        .expect("session closed")
}

async fn wait_update<F>(subscription: &mut StateSubscription, mut predicate: F) -> StateUpdate
where
    F: FnMut(&StateUpdate) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let update = subscription.next_update().await.expect("session closed");
            if predicate(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for state update")
}

// ===========================================
// Tests
// ===========================================

#[tokio::test]
async fn session_loads_board_and_applies_own_action() {
    let server = FakeServer::spawn().await;
    let session = Session::start(test_config(), TcpTransport::new()).unwrap();
    let mut observer = session.observe_connection();
    let mut subscription = session.observe_state();

    session
        .connect(server.endpoint(), CredentialToken::new("board-token"))
        .unwrap();
    wait_synced(&mut observer).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.sequence(), Sequence::new(3));
    assert!(snapshot.get(&EntityId::new("seed/0-0")).is_some());

    let correlation_id = session
        .submit_action(Action::Add(vec![entity("alice/1-0")]))
        .unwrap();

    let confirmed = wait_update(&mut subscription, |u| matches!(u, StateUpdate::Resolved(_))).await;
    assert_eq!(
        confirmed,
        StateUpdate::Resolved(ActionOutcome::confirmed(correlation_id))
    );
    wait_update(&mut subscription, |u| {
        matches!(u, StateUpdate::Applied { sequence, .. } if *sequence == Sequence::new(4))
    })
    .await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.sequence(), Sequence::new(4));
    assert!(snapshot.get(&EntityId::new("alice/1-0")).is_some());
    assert!(snapshot.pending().is_empty());

    assert_eq!(
        server.board.lock().unwrap().tokens,
        vec!["board-token".to_string()]
    );
    session.close().await;
}

#[tokio::test]
async fn session_recovers_after_server_drops_connection() {
    let server = FakeServer::spawn().await;
    let session = Session::start(test_config(), TcpTransport::new()).unwrap();
    let mut observer = session.observe_connection();
    let mut subscription = session.observe_state();

    session
        .connect(server.endpoint(), CredentialToken::anonymous())
        .unwrap();
    wait_synced(&mut observer).await;

    server.kick();
    wait_status(&mut observer, |s| {
        matches!(s.state, ConnectionState::Reconnecting { .. })
    })
    .await;
    wait_synced(&mut observer).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);

    let correlation_id = session
        .submit_action(Action::Add(vec![entity("bob/2-0")]))
        .unwrap();
    let update = wait_update(&mut subscription, |u| matches!(u, StateUpdate::Resolved(_))).await;
    assert_eq!(
        update,
        StateUpdate::Resolved(ActionOutcome::confirmed(correlation_id))
    );

    session.close().await;
}

#[tokio::test]
async fn unreachable_server_keeps_retrying_until_close() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = Session::start(test_config(), TcpTransport::new()).unwrap();
    let mut observer = session.observe_connection();
    session
        .connect(addr.to_string(), CredentialToken::anonymous())
        .unwrap();

    wait_status(&mut observer, |s| {
        s.state == ConnectionState::Reconnecting { attempt: 2 }
    })
    .await;

    session.close().await;
    let mut last = None;
    while let Some(status) = observer.next().await {
        last = Some(status.state);
    }
    assert_eq!(last, Some(ConnectionState::Closed));
}
