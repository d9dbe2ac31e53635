/* This example hosts a small echo service:
   it registers the "com.example.dbustest" name on the session bus, answers
   every Invoke by echoing the parameters back, and emits a "HelloHappened"
   signal each time someone calls it.
*/

extern crate dbusipc;

use dbusipc::BusType;
use std::sync::mpsc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dbusipc::initialize()?;

    let conn = dbusipc::get_connection(BusType::Session, false)?;
    let (ping_tx, ping_rx) = mpsc::channel();

    let reg = dbusipc::register_service(conn, "com.example.dbustest", None, 0,
        move |ctx, method, parameters, no_reply| {
            println!("{}({})", method, parameters);
            if !no_reply {
                dbusipc::return_result_async(&ctx, Some(parameters), |_| ()).ok();
            }
            ping_tx.send(()).ok();
        })?;

    // Announce each handled request with a signal.
    loop {
        ping_rx.recv()?;
        dbusipc::emit(reg, "HelloHappened", Some("{\"greeted\":true}"))?;
    }
}
