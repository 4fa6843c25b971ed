// End-to-end tests over real TCP connections.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cellsync_config::LimitsConfig;
use cellsync_engine::{CellSnapshot, ClientId, ErrorKind, HistoryPolicy, SheetSnapshot};
use cellsync_io::{Storage, TextStorage};
use cellsync_protocol::{encode_request, ClientRequest, ServerMessage, SHUTDOWN_MESSAGE};
use cellsync_server::{ClientRegistry, Controller, Server};

fn start_server(dir: &Path, limits: LimitsConfig) -> (Server, Arc<TextStorage>) {
    let storage = Arc::new(TextStorage::open(dir).unwrap());
    let controller = Arc::new(Controller::new(
        storage.clone(),
        ClientRegistry::new(limits.outbound_queue_depth),
        HistoryPolicy::unbounded(),
    ));
    let server = Server::start("127.0.0.1:0", limits, controller).unwrap();
    (server, storage)
}

struct TestClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    id: ClientId,
    listing: Vec<String>,
    initial: Vec<ServerMessage>,
}

impl TestClient {
    /// Run the handshake and collect what the server sends before the id.
    fn join(server: &Server, username: &str, sheet: &str) -> Self {
        let mut stream = TcpStream::connect(server.bound_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        writeln!(stream, "{username}").unwrap();
        let mut listing = Vec::new();
        loop {
            let line = read_line(&mut reader);
            if line.is_empty() {
                break;
            }
            listing.push(line);
        }

        writeln!(stream, "{sheet}").unwrap();
        let mut initial = Vec::new();
        let id = loop {
            let line = read_line(&mut reader);
            if let Ok(id) = line.parse::<ClientId>() {
                break id;
            }
            initial.push(serde_json::from_str(&line).unwrap());
        };

        Self {
            stream,
            reader,
            id,
            listing,
            initial,
        }
    }

    fn send(&mut self, request: &ClientRequest) {
        self.stream
            .write_all(encode_request(request).unwrap().as_bytes())
            .unwrap();
    }

    fn send_raw(&mut self, line: &str) {
        writeln!(self.stream, "{line}").unwrap();
    }

    fn recv(&mut self) -> ServerMessage {
        let line = read_line(&mut self.reader);
        serde_json::from_str(&line).unwrap_or_else(|e| panic!("bad line {line:?}: {e}"))
    }

    fn assert_closed(&mut self) {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap_or(0);
        assert_eq!(n, 0, "expected close, got {line:?}");
    }
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    let n = reader.read_line(&mut line).unwrap();
    assert!(n > 0, "connection closed");
    line.trim_end_matches(['\r', '\n']).to_string()
}

fn select(cell: &str) -> ClientRequest {
    ClientRequest::SelectCell {
        cell_name: cell.into(),
    }
}

fn edit(cell: &str, contents: &str) -> ClientRequest {
    ClientRequest::EditCell {
        cell_name: cell.into(),
        contents: contents.into(),
    }
}

fn updated(cell: &str, contents: &str) -> ServerMessage {
    ServerMessage::CellUpdated {
        cell_name: cell.into(),
        contents: contents.into(),
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_handshake_lists_and_loads_stored_sheet() {
    let dir = tempfile::tempdir().unwrap();
    let (server, storage) = start_server(dir.path(), LimitsConfig::default());
    storage
        .save(
            "budget",
            &SheetSnapshot {
                cells: vec![CellSnapshot {
                    name: "A1".into(),
                    content: "5".into(),
                    history: vec![],
                }],
                edits: vec![],
            },
        )
        .unwrap();

    let client = TestClient::join(&server, "alice", "budget");
    assert_eq!(client.listing, vec!["budget"]);
    assert_eq!(client.initial, vec![updated("A1", "5")]);
    assert!(client.id > 0);

    let other = TestClient::join(&server, "bob", "fresh");
    assert_eq!(other.listing, vec!["budget"]);
    assert!(other.initial.is_empty());
    assert_ne!(other.id, client.id);
}

#[test]
fn test_changes_reach_everyone_on_the_sheet() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _) = start_server(dir.path(), LimitsConfig::default());

    let mut alice = TestClient::join(&server, "alice", "shared");
    let mut bob = TestClient::join(&server, "bob", "shared");
    assert_eq!(bob.listing, vec!["shared"], "open sheets are listed");

    alice.send(&select("a1"));
    let selected = ServerMessage::CellSelected {
        cell_name: "A1".into(),
        selector: alice.id,
        selector_name: "alice".into(),
    };
    assert_eq!(alice.recv(), selected);
    assert_eq!(bob.recv(), selected);

    alice.send(&edit("A1", "= 1 + 2"));
    assert_eq!(alice.recv(), updated("A1", "=1+2"));
    assert_eq!(bob.recv(), updated("A1", "=1+2"));

    // Rejections go to the requester only
    bob.send(&edit("B1", "7"));
    match bob.recv() {
        ServerMessage::RequestError {
            cell_name,
            error_kind,
            ..
        } => {
            assert_eq!(cell_name, "B1");
            assert_eq!(error_kind, Some(ErrorKind::NotSelected));
        }
        other => panic!("unexpected {other:?}"),
    }

    alice.send(&ClientRequest::Undo);
    assert_eq!(alice.recv(), updated("A1", ""));
    assert_eq!(bob.recv(), updated("A1", ""));
}

#[test]
fn test_cycle_is_rejected_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _) = start_server(dir.path(), LimitsConfig::default());
    let mut alice = TestClient::join(&server, "alice", "loops");

    alice.send(&select("A1"));
    alice.recv();
    alice.send(&edit("A1", "=B1"));
    assert_eq!(alice.recv(), updated("A1", "=B1"));
    alice.send(&select("B1"));
    alice.recv();
    alice.send(&edit("B1", "=A1*2"));
    assert!(matches!(
        alice.recv(),
        ServerMessage::RequestError {
            error_kind: Some(ErrorKind::CircularDependency),
            ..
        }
    ));
}

#[test]
fn test_disconnect_notifies_and_last_one_saves() {
    let dir = tempfile::tempdir().unwrap();
    let (server, storage) = start_server(dir.path(), LimitsConfig::default());

    let mut alice = TestClient::join(&server, "alice", "notes");
    let bob = TestClient::join(&server, "bob", "notes");

    alice.send(&select("C3"));
    alice.recv();
    alice.send(&edit("C3", "hello"));
    assert_eq!(alice.recv(), updated("C3", "hello"));

    let bob_id = bob.id;
    bob.stream.shutdown(Shutdown::Both).unwrap();
    drop(bob);
    assert_eq!(alice.recv(), ServerMessage::Disconnected { user: bob_id });
    assert!(storage.load("notes").unwrap().is_empty());

    alice.stream.shutdown(Shutdown::Both).unwrap();
    drop(alice);
    wait_until(|| !storage.load("notes").unwrap().is_empty());

    let saved = storage.load("notes").unwrap();
    assert_eq!(saved.cells.len(), 1);
    assert_eq!(saved.cells[0].content, "hello");
    assert_eq!(saved.edits.len(), 1);

    // Reopening restores the cells and the undo log
    let mut carol = TestClient::join(&server, "carol", "notes");
    assert_eq!(carol.initial, vec![updated("C3", "hello")]);
    carol.send(&ClientRequest::Undo);
    assert_eq!(carol.recv(), updated("C3", ""));
}

#[test]
fn test_malformed_lines_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let limits = LimitsConfig {
        max_parse_failures: 2,
        ..LimitsConfig::default()
    };
    let (server, _) = start_server(dir.path(), limits);
    let mut client = TestClient::join(&server, "mallory", "sheet");

    client.send_raw("not json");
    assert!(matches!(
        client.recv(),
        ServerMessage::RequestError { error_kind: None, .. }
    ));

    // A valid request resets the count
    client.send(&select("A1"));
    assert!(matches!(client.recv(), ServerMessage::CellSelected { .. }));

    client.send_raw(r#"{"requestType":"explode"}"#);
    client.recv();
    client.send_raw("{");
    client.recv();
    client.assert_closed();

    wait_until(|| {
        server
            .metrics()
            .connections_closed_parse_failures
            .load(std::sync::atomic::Ordering::Relaxed)
            == 1
    });
}

#[test]
fn test_oversize_line_disconnects() {
    let dir = tempfile::tempdir().unwrap();
    let limits = LimitsConfig {
        max_message_size: 64,
        ..LimitsConfig::default()
    };
    let (server, _) = start_server(dir.path(), limits);
    let mut client = TestClient::join(&server, "alice", "sheet");

    client.send_raw(&"x".repeat(500));
    assert!(matches!(client.recv(), ServerMessage::RequestError { .. }));
    client.assert_closed();
}

#[test]
fn test_connection_limit() {
    let dir = tempfile::tempdir().unwrap();
    let limits = LimitsConfig {
        max_connections: 1,
        ..LimitsConfig::default()
    };
    let (server, _) = start_server(dir.path(), limits);
    let _first = TestClient::join(&server, "alice", "sheet");

    let stream = TcpStream::connect(server.bound_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut reader = BufReader::new(stream);
    let line = read_line(&mut reader);
    let message: ServerMessage = serde_json::from_str(&line).unwrap();
    assert!(matches!(message, ServerMessage::ServerError { .. }));
}

#[test]
fn test_stop_saves_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, storage) = start_server(dir.path(), LimitsConfig::default());
    let mut alice = TestClient::join(&server, "alice", "budget");
    alice.send(&select("A1"));
    alice.recv();
    alice.send(&edit("A1", "42"));
    alice.recv();

    server.stop();
    assert!(!server.is_running());
    assert_eq!(alice.recv(), ServerMessage::server_error(SHUTDOWN_MESSAGE));
    alice.assert_closed();
    assert_eq!(storage.load("budget").unwrap().cells[0].content, "42");
}
