//! End-to-end tests against a running session bus, like the upstream dbus
//! test suite these assume `DBUS_SESSION_BUS_ADDRESS` points somewhere
//! real. Each test uses its own bus name so the suite can run in parallel
//! within one process.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbusipc::{BusType, Domain, ErrorCode, Handle, RequestContext};

fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
    dbusipc::initialize().unwrap();
}

#[test]
fn invoke_round_trips_parameters() {
    setup();
    let service_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let (seen_tx, seen_rx) = mpsc::channel();
    let reg = dbusipc::register_service(
        service_conn,
        "com.example.dbusipc.echo",
        None,
        0,
        move |ctx, method, params, no_reply| {
            seen_tx.send((method.to_string(), params.to_string(), no_reply)).unwrap();
            dbusipc::return_result_async(&ctx, Some(params), |_| ()).unwrap();
        },
    )
    .unwrap();

    let client_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let response = dbusipc::invoke(
        client_conn,
        "com.example.dbusipc.echo",
        None,
        "Echo",
        Some("{\"s\":\"hi\"}"),
        5000,
    )
    .unwrap();

    assert!(!response.is_error(), "unexpected failure: {:?}", response);
    assert_eq!(response.result.as_deref(), Some("{\"s\":\"hi\"}"));

    let (method, params, no_reply) = seen_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(method, "Echo");
    assert_eq!(params, "{\"s\":\"hi\"}");
    assert!(!no_reply);

    dbusipc::unregister_service(reg).unwrap();
    dbusipc::close_connection(client_conn).unwrap();
    dbusipc::close_connection(service_conn).unwrap();
}

#[test]
fn null_parameters_become_empty_object() {
    setup();
    let service_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let (seen_tx, seen_rx) = mpsc::channel();
    let reg = dbusipc::register_service(
        service_conn,
        "com.example.dbusipc.defaults",
        None,
        0,
        move |ctx, _method, params, _no_reply| {
            seen_tx.send(params.to_string()).unwrap();
            dbusipc::return_result_async(&ctx, None, |_| ()).unwrap();
        },
    )
    .unwrap();

    let client_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let response = dbusipc::invoke(client_conn, "com.example.dbusipc.defaults", None, "Poke", None, 5000).unwrap();
    assert_eq!(seen_rx.recv_timeout(Duration::from_secs(1)).unwrap(), "{}");
    assert_eq!(response.result.as_deref(), Some("{}"));

    dbusipc::unregister_service(reg).unwrap();
    dbusipc::close_connection(client_conn).unwrap();
    dbusipc::close_connection(service_conn).unwrap();
}

#[test]
fn invoke_on_missing_service_reports_daemon_error() {
    setup();
    let conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let response = dbusipc::invoke(conn, "com.example.dbusipc.absent", None, "Ping", None, 250).unwrap();
    assert!(response.is_error());
    assert_eq!(response.err_code.domain(), Domain::Dbus);
    assert_eq!(response.err_name.as_deref(), Some("org.freedesktop.DBus.Error.ServiceUnknown"));
    assert!(response.result.is_none());
    dbusipc::close_connection(conn).unwrap();
}

#[test]
fn emitted_signal_reaches_subscriber_exactly_once() {
    setup();
    let service_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let reg = dbusipc::register_service(service_conn, "com.example.dbusipc.sig", None, 0, |_ctx, _m, _p, _n| {})
        .unwrap();

    let sub_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let (tx, rx) = mpsc::channel();
    let sub = dbusipc::subscribe(sub_conn, "/com/example/dbusipc/sig", "Chimed", move |name, data| {
        tx.send((name.to_string(), data.to_string())).unwrap();
    })
    .unwrap();

    dbusipc::emit(reg, "Chimed", Some("{\"n\":3}")).unwrap();

    let (name, data) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(name, "Chimed");
    assert_eq!(data, "{\"n\":3}");
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err(), "signal delivered twice");

    dbusipc::unsubscribe(sub).unwrap();
    dbusipc::emit(reg, "Chimed", Some("{\"n\":4}")).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err(), "unsubscribed but still delivered");

    dbusipc::unregister_service(reg).unwrap();
    dbusipc::close_connection(sub_conn).unwrap();
    dbusipc::close_connection(service_conn).unwrap();
}

#[test]
fn cancelled_invocation_delivers_cancelled_exactly_once() {
    setup();
    let service_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    // A service that never answers: the context is parked so the call
    // stays pending until the client gives up.
    let parked: Arc<Mutex<Option<RequestContext>>> = Arc::new(Mutex::new(None));
    let parked2 = parked.clone();
    let reg = dbusipc::register_service(
        service_conn,
        "com.example.dbusipc.slow",
        None,
        0,
        move |ctx, _m, _p, _n| {
            *parked2.lock().unwrap() = Some(ctx);
        },
    )
    .unwrap();

    let client_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let (tx, rx) = mpsc::channel();
    let handle = dbusipc::invoke_async(
        client_conn,
        "com.example.dbusipc.slow",
        None,
        "Stall",
        None,
        false,
        30_000,
        move |status, result| tx.send((status, result)).unwrap(),
    )
    .unwrap();
    assert!(handle.is_valid());

    std::thread::sleep(Duration::from_millis(50));
    dbusipc::cancel(handle).unwrap();

    let (status, result) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(status.error.code(), ErrorCode::Cancelled);
    assert!(result.is_none());
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err(), "second completion after cancel");

    // Cancelling again finds nothing.
    assert_eq!(dbusipc::cancel(handle).unwrap_err().code(), ErrorCode::NotFound);

    *parked.lock().unwrap() = None;
    dbusipc::unregister_service(reg).unwrap();
    dbusipc::close_connection(client_conn).unwrap();
    dbusipc::close_connection(service_conn).unwrap();
}

#[test]
fn owner_change_notifies_subscriber() {
    setup();
    let watcher = dbusipc::get_connection(BusType::Session, true).unwrap();
    let (tx, rx) = mpsc::channel();
    let sub = dbusipc::subscribe_owner_changed(watcher, Some("com.example.dbusipc.owner"), move |name, old, new| {
        tx.send((name.to_string(), old.to_string(), new.to_string())).unwrap();
    })
    .unwrap();

    let owner_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let reg = dbusipc::register_service(owner_conn, "com.example.dbusipc.owner", None, 0, |_c, _m, _p, _n| {})
        .unwrap();

    let (name, old, new) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(name, "com.example.dbusipc.owner");
    assert_eq!(old, "");
    assert!(new.starts_with(':'), "expected a unique name, got {:?}", new);

    dbusipc::unregister_service(reg).unwrap();
    dbusipc::unsubscribe(sub).unwrap();
    dbusipc::close_connection(owner_conn).unwrap();
    dbusipc::close_connection(watcher).unwrap();
}

#[test]
fn name_has_owner_tracks_registration() {
    setup();
    let conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    assert!(!dbusipc::name_has_owner(conn, "com.example.dbusipc.hasowner").unwrap());

    let reg = dbusipc::register_service(conn, "com.example.dbusipc.hasowner", None, 0, |_c, _m, _p, _n| {})
        .unwrap();
    assert!(dbusipc::name_has_owner(conn, "com.example.dbusipc.hasowner").unwrap());

    dbusipc::unregister_service(reg).unwrap();
    dbusipc::close_connection(conn).unwrap();
}

#[test]
fn shared_connections_are_cached() {
    setup();
    let a = dbusipc::get_connection(BusType::Session, false).unwrap();
    let b = dbusipc::get_connection(BusType::Session, false).unwrap();
    assert_eq!(a, b);
    // Private connections are always distinct logical handles.
    let p = dbusipc::get_connection(BusType::Session, true).unwrap();
    assert_ne!(a, p);
    dbusipc::close_connection(p).unwrap();
    dbusipc::close_connection(b).unwrap();
    dbusipc::close_connection(a).unwrap();
}

#[test]
fn service_error_reply_carries_name_and_message() {
    setup();
    let service_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let reg = dbusipc::register_service(
        service_conn,
        "com.example.dbusipc.failing",
        None,
        0,
        move |ctx, _m, _p, _n| {
            dbusipc::return_error_async(&ctx, None, Some("{\"reason\":\"nope\"}"), |_| ()).unwrap();
        },
    )
    .unwrap();

    let client_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let response = dbusipc::invoke(client_conn, "com.example.dbusipc.failing", None, "Try", None, 5000).unwrap();
    assert!(response.is_error());
    assert_eq!(response.err_name.as_deref(), Some("com.hsae.service.Error"));
    assert_eq!(response.err_msg.as_deref(), Some("{\"reason\":\"nope\"}"));

    dbusipc::unregister_service(reg).unwrap();
    dbusipc::close_connection(client_conn).unwrap();
    dbusipc::close_connection(service_conn).unwrap();
}

#[test]
fn synchronous_call_from_dispatch_thread_is_refused() {
    setup();
    let service_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let (tx, rx) = mpsc::channel();
    let reg = dbusipc::register_service(
        service_conn,
        "com.example.dbusipc.deadlock",
        None,
        0,
        move |ctx, _m, _p, _n| {
            // Runs on the dispatch thread: a synchronous call here can
            // never be answered and must fail fast.
            let err = dbusipc::cancel(Handle::INVALID).unwrap_err();
            let err2 = dbusipc::name_has_owner(ctx.connection(), "com.example.anything").unwrap_err();
            tx.send((err, err2)).unwrap();
            dbusipc::return_result_async(&ctx, None, |_| ()).unwrap();
        },
    )
    .unwrap();

    let client_conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let _ = dbusipc::invoke(client_conn, "com.example.dbusipc.deadlock", None, "Go", None, 5000).unwrap();

    let (err, err2) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    // cancel(INVALID) fails BadArgs before the thread check can matter;
    // the sync daemon query is the real probe.
    assert_eq!(err.code(), ErrorCode::BadArgs);
    assert_eq!(err2.code(), ErrorCode::Deadlock);

    dbusipc::unregister_service(reg).unwrap();
    dbusipc::close_connection(client_conn).unwrap();
    dbusipc::close_connection(service_conn).unwrap();
}
