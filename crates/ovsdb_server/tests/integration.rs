//! Wire-level tests: raw CBOR frames against a listening server.

use ovsdb_protocol::{
    encode_frame, BaseType, ClientMessage, ColumnType, DatabaseSchema, Datum, FrameDecoder,
    MonitorRequest, Operation, OperationResult, RowUpdate, ServerMessage, TableSchema,
    DEFAULT_MAX_FRAME_SIZE,
};
use ovsdb_server::{ListenerHandle, OvsdbServer, ServerConfig};
use proptest::prelude::*;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const DB: &str = "OVN_Northbound";

fn schema() -> DatabaseSchema {
    DatabaseSchema::new(DB, "1.0").with_table(
        TableSchema::new("Logical_Switch")
            .with_column("name", ColumnType::scalar(BaseType::string()))
            .with_column(
                "external_ids",
                ColumnType::map(BaseType::string(), BaseType::string()),
            ),
    )
}

/// A client speaking frames directly, without the IDL.
struct WireClient {
    stream: TcpStream,
    decoder: FrameDecoder,
    next_id: u64,
}

impl WireClient {
    fn connect(listener: &ListenerHandle) -> Self {
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE),
            next_id: 1,
        }
    }

    fn send(&mut self, message: &ClientMessage) {
        let frame = encode_frame(message).unwrap();
        self.stream.write_all(&frame).unwrap();
    }

    fn recv(&mut self) -> ServerMessage {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(message) = self.decoder.next_frame().unwrap() {
                return message;
            }
            let n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "server closed the connection");
            self.decoder.extend(&buf[..n]);
        }
    }

    fn id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn monitor(&mut self, columns: &[&str]) -> ServerMessage {
        let id = self.id();
        let request = MonitorRequest::new().with_table(
            "Logical_Switch",
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self.send(&ClientMessage::Monitor {
            id,
            database: DB.into(),
            request,
        });
        self.recv()
    }

    fn insert_switch(&mut self, name: &str) -> u64 {
        let id = self.id();
        self.send(&ClientMessage::Transact {
            id,
            database: DB.into(),
            operations: vec![Operation::Insert {
                table: "Logical_Switch".into(),
                uuid_name: None,
                row: [("name".to_string(), Datum::scalar(name))].into(),
            }],
        });
        id
    }
}

fn start() -> (OvsdbServer, ListenerHandle) {
    let server = OvsdbServer::new(schema(), ServerConfig::default());
    let listener = server.listen_tcp("127.0.0.1:0").unwrap();
    (server, listener)
}

#[test]
fn schema_request_over_tcp() {
    let (_server, listener) = start();
    assert!(listener.remote().starts_with("tcp:127.0.0.1:"));
    let mut client = WireClient::connect(&listener);

    client.send(&ClientMessage::GetSchema {
        id: 7,
        database: DB.into(),
    });
    match client.recv() {
        ServerMessage::Schema { id, schema } => {
            assert_eq!(id, 7);
            assert_eq!(schema.name, DB);
        }
        other => panic!("unexpected reply {other:?}"),
    }

    client.send(&ClientMessage::GetSchema {
        id: 8,
        database: "Nope".into(),
    });
    match client.recv() {
        ServerMessage::Error { id, error } => {
            assert_eq!(id, 8);
            assert_eq!(error, "unknown database: Nope");
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn update_precedes_transact_reply() {
    let (_server, listener) = start();
    let mut client = WireClient::connect(&listener);
    match client.monitor(&["name"]) {
        ServerMessage::Monitored { initial, .. } => assert!(initial.is_empty()),
        other => panic!("unexpected reply {other:?}"),
    }

    let id = client.insert_switch("sw0");
    let inserted = match client.recv() {
        ServerMessage::Update { updates } => {
            let rows = &updates.tables["Logical_Switch"];
            assert_eq!(rows.len(), 1);
            let (uuid, update) = rows.iter().next().unwrap();
            match update {
                RowUpdate::Insert(columns) => {
                    assert_eq!(columns["name"], Datum::scalar("sw0"));
                    assert!(!columns.contains_key("external_ids"));
                }
                other => panic!("unexpected update {other:?}"),
            }
            *uuid
        }
        other => panic!("expected an update first, got {other:?}"),
    };
    match client.recv() {
        ServerMessage::Transacted { id: reply, results } => {
            assert_eq!(reply, id);
            assert_eq!(results, vec![OperationResult::Inserted { uuid: inserted }]);
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn other_sessions_see_changes() {
    let (server, listener) = start();
    let mut watcher = WireClient::connect(&listener);
    watcher.monitor(&[]);

    let mut writer = WireClient::connect(&listener);
    writer.insert_switch("sw0");
    assert!(matches!(writer.recv(), ServerMessage::Transacted { .. }));

    match watcher.recv() {
        ServerMessage::Update { updates } => assert_eq!(updates.row_count(), 1),
        other => panic!("unexpected message {other:?}"),
    }
    assert_eq!(server.rows("Logical_Switch").len(), 1);
}

#[test]
fn echo_over_tcp() {
    let (_server, listener) = start();
    let mut client = WireClient::connect(&listener);
    client.send(&ClientMessage::Echo { id: 3 });
    assert_eq!(client.recv(), ServerMessage::EchoReply { id: 3 });
}

#[test]
fn session_limit_applies_to_channels() {
    let server = OvsdbServer::new(schema(), ServerConfig::new().with_max_sessions(1));
    let _first = server.connect_channel().unwrap();
    assert!(server.connect_channel().is_err());
}

#[test]
fn oversized_transactions_are_refused() {
    let server = OvsdbServer::new(schema(), ServerConfig::new().with_max_operations(1));
    let (tx, rx) = server.connect_channel().unwrap();
    let operation = Operation::Comment {
        comment: "x".into(),
    };
    tx.send(ClientMessage::Transact {
        id: 1,
        database: DB.into(),
        operations: vec![operation.clone(), operation],
    })
    .unwrap();
    match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
        ServerMessage::Error { id, .. } => assert_eq!(id, 1),
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(server.transaction_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn snapshot_holds_every_committed_row(
        names in prop::collection::btree_set("[a-z]{1,8}", 0..8)
    ) {
        let server = OvsdbServer::new(schema(), ServerConfig::default());
        for name in &names {
            let outcome = server.execute(&[Operation::Insert {
                table: "Logical_Switch".into(),
                uuid_name: None,
                row: [("name".to_string(), Datum::scalar(name.as_str()))].into(),
            }]);
            prop_assert!(outcome.committed());
        }

        let (tx, rx) = server.connect_channel().unwrap();
        tx.send(ClientMessage::Monitor {
            id: 1,
            database: DB.into(),
            request: MonitorRequest::new().with_table("Logical_Switch", vec!["name".into()]),
        })
        .unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ServerMessage::Monitored { initial, .. } => {
                prop_assert_eq!(initial.row_count(), names.len());
            }
            other => prop_assert!(false, "unexpected reply {:?}", other),
        }
    }
}
