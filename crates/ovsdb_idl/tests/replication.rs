//! End-to-end tests against the reference server.

use ovsdb_idl::{
    ChannelTransport, Idl, IdlError, Outcome, RejectReason, SchemaFilter, StreamTransport,
};
use ovsdb_protocol::{errors, Atom, Condition, Datum, Mutation, Operation, Uuid};
use ovsdb_testkit::prelude::*;
use proptest::prelude::*;
use std::time::Duration;

fn switch_filter(server: &TestServer) -> SchemaFilter {
    let mut filter = server.filter();
    filter
        .register_columns("Logical_Switch", ["name", "ports", "external_ids"])
        .unwrap()
        .register_table("Logical_Switch_Port")
        .unwrap();
    filter
}

fn create_switch(idl: &mut Idl<ChannelTransport>, name: &str) -> Uuid {
    let mut txn = idl.transaction();
    let switch = txn.insert("Logical_Switch").unwrap();
    txn.set_column(&switch, "name", Datum::scalar(name)).unwrap();
    let report = idl.commit_block_detailed(txn).unwrap();
    assert_eq!(report.outcome, Outcome::Success);
    report.inserted_uuid(switch.uuid()).unwrap()
}

#[test]
fn inserted_row_reads_back() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    let before = idl.change_seqno();

    let uuid = create_switch(&mut idl, "sw0");

    assert!(idl.change_seqno() > before);
    let row = idl.table("Logical_Switch").unwrap().get(uuid).unwrap();
    assert_eq!(row.get_str("name").unwrap(), Some("sw0"));
    assert!(row.get_set("ports").unwrap().is_empty());
    assert_eq!(server.rows("Logical_Switch").len(), 1);
}

#[test]
fn insert_with_reference_to_new_row() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    let switch_uuid = create_switch(&mut idl, "sw0");

    let mut txn = idl.transaction();
    let port = txn.insert("Logical_Switch_Port").unwrap();
    txn.set_column(&port, "name", Datum::scalar("p1")).unwrap();
    txn.set_column(&port, "addresses", Datum::set(["00:00:00:00:00:01 10.0.0.1"]))
        .unwrap();
    let switch = idl.table("Logical_Switch").unwrap().get(switch_uuid).unwrap();
    txn.add_to_set(&switch, "ports", port.uuid()).unwrap();
    let report = idl.commit_block_detailed(txn).unwrap();
    assert_eq!(report.outcome, Outcome::Success);

    let port_uuid = report.inserted_uuid(port.uuid()).unwrap();
    let port_row = idl.table("Logical_Switch_Port").unwrap().get(port_uuid).unwrap();
    let switch = idl.table("Logical_Switch").unwrap().get(switch_uuid).unwrap();
    assert!(port_row.belongs_to(&switch, "ports").unwrap());
    assert_eq!(port_row.get_str("type").unwrap(), Some(""));
}

#[test]
fn dangling_reference_is_rejected() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    let switch_uuid = create_switch(&mut idl, "sw0");

    let mut txn = idl.transaction();
    let switch = idl.table("Logical_Switch").unwrap().get(switch_uuid).unwrap();
    txn.add_to_set(&switch, "ports", Uuid::new_v4()).unwrap();
    let outcome = idl.commit_block(txn).unwrap();

    match &outcome {
        Outcome::Error(error) => {
            assert!(error.is_referential_integrity());
            assert_eq!(error.reason(), RejectReason::ReferentialIntegrity);
        }
        other => panic!("unexpected outcome {other}"),
    }
    assert!(matches!(
        outcome.into_error(1),
        Some(IdlError::TransactionRejected {
            reason: RejectReason::ReferentialIntegrity,
            ..
        })
    ));
    assert!(idl.table("Logical_Switch").unwrap().get(switch_uuid).unwrap()
        .get_set("ports").unwrap().is_empty());
}

#[test]
fn excluded_table_is_never_replicated() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));

    server.insert("Logical_Router", row(&[("name", Datum::scalar("lr0"))]));
    server.insert("Logical_Switch", row(&[("name", Datum::scalar("sw0"))]));
    idl.await_change(Duration::from_secs(5)).unwrap();

    assert!(matches!(
        idl.table("Logical_Router"),
        Err(IdlError::TableNotReplicated(_))
    ));
    assert_eq!(idl.replica().row_count(), 1);
    let switch = idl.table("Logical_Switch").unwrap().rows().next().unwrap();
    assert!(matches!(
        switch.get("other_config"),
        Err(IdlError::ColumnNotReplicated { .. })
    ));
    assert!(idl.transaction().insert("Logical_Router").is_err());
}

#[test]
fn remote_changes_arrive_as_updates() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    let uuid = server.insert("Logical_Switch", row(&[("name", Datum::scalar("sw0"))]));
    idl.await_change(Duration::from_secs(5)).unwrap();

    server.execute(&[Operation::Mutate {
        table: "Logical_Switch".into(),
        conditions: vec![Condition::uuid_eq(uuid)],
        mutations: vec![Mutation::insert("external_ids", Datum::map([("owner", "test")]))],
    }]);
    idl.await_change(Duration::from_secs(5)).unwrap();
    let row = idl.table("Logical_Switch").unwrap().get(uuid).unwrap();
    assert_eq!(row.map_value("external_ids", "owner").unwrap(), Some("test"));

    server.execute(&[Operation::Delete {
        table: "Logical_Switch".into(),
        conditions: vec![Condition::uuid_eq(uuid)],
    }]);
    idl.await_change(Duration::from_secs(5)).unwrap();
    assert!(idl.table("Logical_Switch").unwrap().is_empty());
}

#[test]
fn await_change_times_out_without_updates() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    assert!(matches!(
        idl.await_change(Duration::from_millis(50)),
        Err(IdlError::Timeout { .. })
    ));
}

#[test]
fn verify_detects_concurrent_write() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    let uuid = create_switch(&mut idl, "sw0");

    let mut txn = idl.transaction();
    let switch = idl.table("Logical_Switch").unwrap().get(uuid).unwrap();
    txn.verify(&switch, "name").unwrap();
    txn.set_key(&switch, "external_ids", "seen", "yes").unwrap();

    server.execute(&[Operation::Update {
        table: "Logical_Switch".into(),
        conditions: vec![Condition::uuid_eq(uuid)],
        row: row(&[("name", Datum::scalar("renamed"))]),
    }]);

    assert_eq!(idl.commit_block(txn).unwrap(), Outcome::TryAgain);
    let switch = idl.table("Logical_Switch").unwrap().get(uuid).unwrap();
    assert_eq!(switch.get_str("name").unwrap(), Some("renamed"));
    assert_eq!(switch.map_value("external_ids", "seen").unwrap(), None);
}

#[test]
fn injected_timeouts_are_try_again() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    server.fail_next_transactions(1, errors::TIMED_OUT);

    let mut txn = idl.transaction();
    let switch = txn.insert("Logical_Switch").unwrap();
    txn.set_column(&switch, "name", Datum::scalar("sw0")).unwrap();
    assert_eq!(idl.commit_block(txn).unwrap(), Outcome::TryAgain);
    assert!(server.rows("Logical_Switch").is_empty());
}

#[test]
fn empty_transaction_sends_nothing() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    let before = server.transaction_count();
    assert_eq!(idl.commit_block(idl.transaction()).unwrap(), Outcome::Unchanged);
    assert_eq!(server.transaction_count(), before);
}

#[test]
fn singleton_lookup() {
    let server = TestServer::southbound();
    let mut filter = server.filter();
    filter.register_columns("SB_Global", ["connections"]).unwrap();
    let idl = server.connect(filter);
    let global = idl.get_singleton("SB_Global").unwrap();
    assert!(global.get_set("connections").unwrap().is_empty());

    server.insert("SB_Global", row(&[]));
    let mut filter = server.filter();
    filter.register_table("SB_Global").unwrap();
    let idl = server.connect(filter);
    assert!(matches!(
        idl.get_singleton("SB_Global"),
        Err(IdlError::SingletonViolation { count: 2, .. })
    ));
}

#[test]
fn schema_mismatch_fails_connect() {
    let server = TestServer::northbound();
    let filter = {
        let mut filter = SchemaFilter::new(schemas::southbound());
        filter.register_table("SB_Global").unwrap();
        filter
    };
    let transport = server.transport();
    assert!(matches!(
        Idl::connect(transport, filter, test_config()),
        Err(IdlError::Schema(_))
    ));
}

#[test]
fn echo_round_trip() {
    let server = TestServer::northbound();
    let mut idl = server.connect(switch_filter(&server));
    assert!(idl.echo(Duration::from_secs(5)).is_ok());
    assert_eq!(server.probe(), 1);
    idl.wait(Duration::from_millis(50)).unwrap();
    idl.run().unwrap();
    idl.close();
    assert!(!idl.is_connected());
    assert!(matches!(idl.run(), Err(IdlError::Closed)));
}

#[cfg(unix)]
#[test]
fn replicates_over_unix_socket() {
    let socket = SocketServer::start(TestServer::open_vswitch(), "db.sock");
    let transport = StreamTransport::open(socket.remote(), &test_config()).unwrap();
    let mut filter = socket.server.filter();
    filter.register_columns("Open_vSwitch", ["external_ids"]).unwrap();
    let mut idl = Idl::connect(transport, filter, test_config()).unwrap();

    let mut txn = idl.transaction();
    let root = idl.get_singleton("Open_vSwitch").unwrap();
    txn.set_key(&root, "external_ids", "ovn-remote", "tcp:10.0.0.1:6642")
        .unwrap();
    assert_eq!(idl.commit_block(txn).unwrap(), Outcome::Success);

    let root = idl.get_singleton("Open_vSwitch").unwrap();
    assert_eq!(
        root.map_value("external_ids", "ovn-remote").unwrap(),
        Some("tcp:10.0.0.1:6642")
    );
    let stored = socket.server.rows("Open_vSwitch");
    let (_, columns) = stored.iter().next().unwrap();
    assert!(columns["external_ids"].contains(&Atom::from("ovn-remote")));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn staged_values_round_trip(
        name in name_strategy(),
        ids in string_map_strategy(),
    ) {
        let server = TestServer::northbound();
        let mut idl = server.connect(switch_filter(&server));

        let mut txn = idl.transaction();
        let switch = txn.insert("Logical_Switch").unwrap();
        txn.set_column(&switch, "name", Datum::scalar(name.as_str())).unwrap();
        txn.set_column(&switch, "external_ids", ids.clone()).unwrap();
        let report = idl.commit_block_detailed(txn).unwrap();
        prop_assert_eq!(&report.outcome, &Outcome::Success);

        let uuid = report.inserted_uuid(switch.uuid()).unwrap();
        let row = idl.table("Logical_Switch").unwrap().get(uuid).unwrap();
        prop_assert_eq!(row.get_str("name").unwrap(), Some(name.as_str()));
        prop_assert_eq!(row.get("external_ids").unwrap(), &ids);
    }
}
