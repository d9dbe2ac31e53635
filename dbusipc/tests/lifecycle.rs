//! Library lifecycle: shutdown tears everything down, later calls fail
//! with a clean error, and the library can be initialized again. Kept in
//! its own test binary because shutdown is process-wide.

use dbusipc::{BusType, ErrorCode};

#[test]
fn shutdown_and_reinitialize() {
    let _ = env_logger::builder().is_test(true).try_init();

    dbusipc::initialize().unwrap();
    // Redundant initialize succeeds.
    dbusipc::initialize().unwrap();

    let conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    let _shared = dbusipc::get_connection(BusType::Session, false).unwrap();

    // Shutdown force-releases the connections we never closed.
    dbusipc::shutdown();

    let err = dbusipc::get_connection(BusType::Session, true).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CmdSubmission);
    let err = dbusipc::invoke(conn, "com.example.dbusipc.gone", None, "Ping", None, -1).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CmdSubmission);

    // A second round works from scratch.
    dbusipc::initialize().unwrap();
    let conn = dbusipc::get_connection(BusType::Session, true).unwrap();
    assert!(!dbusipc::name_has_owner(conn, "com.example.dbusipc.nobody").unwrap());
    dbusipc::close_connection(conn).unwrap();
    dbusipc::shutdown();
    // And shutting down twice is harmless.
    dbusipc::shutdown();
}
