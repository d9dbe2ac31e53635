extern crate dbusipc;

use dbusipc::BusType;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // First bring up the library and a shared session bus connection.
    dbusipc::initialize()?;
    let conn = dbusipc::get_connection(BusType::Session, false)?;

    // Now make the method call. The server echoes the JSON payload back as
    // the result string.
    let response = dbusipc::invoke(conn, "com.example.dbustest", None, "Hello", Some("{\"name\":\"world\"}"), 5000)?;

    match response.result {
        Some(result) => println!("{}", result),
        None => println!(
            "call failed: {} ({})",
            response.err_msg.unwrap_or_default(),
            response.err_name.unwrap_or_default()
        ),
    }

    dbusipc::close_connection(conn)?;
    dbusipc::shutdown();
    Ok(())
}
