use anyhow::{Context, Result};
use gcloudsql::{Connection, Operation};

use crate::common::print_table;

pub fn show(conn: &Connection) -> Result<()> {
    let instance = conn.instance();
    println!("Instance:   {}", instance.connection_name);
    println!("State:      {}", instance.state);
    println!("Version:    {}", instance.database_version);
    println!("Region:     {}", instance.region);
    match instance.public_ip() {
        Ok(ip) => println!("Public IP:  {}", ip),
        Err(_) => println!("Public IP:  -"),
    }
    let ssl = match instance.require_ssl() {
        Some(true) => "required",
        Some(false) => "not required",
        None => "unknown",
    };
    println!("SSL:        {}", ssl);
    println!();

    let rows: Vec<[String; 2]> = instance
        .authorized_networks()
        .iter()
        .map(|n| [n.name.clone(), n.value.clone()])
        .collect();
    print_table(&["Name", "Value"], &rows);
    Ok(())
}

pub fn ssl(conn: &Connection, require: bool) -> Result<()> {
    let operation = if require {
        conn.enable_ssl()
    } else {
        conn.disable_ssl()
    }
    .context("Failed to update SSL policy")?;
    report(&operation);
    Ok(())
}

pub fn whitelist(conn: &Connection, name: &str, value: &str) -> Result<()> {
    let operation = conn
        .whitelist_ip(name, value)
        .with_context(|| format!("Failed to authorize {}", value))?;
    report(&operation);
    Ok(())
}

pub fn blacklist(conn: &Connection, value: &str) -> Result<()> {
    let operation = conn
        .blacklist_ip(value)
        .with_context(|| format!("Failed to revoke {}", value))?;
    report(&operation);
    Ok(())
}

pub fn set_password(conn: &Connection, user: &str, password: &str) -> Result<()> {
    let operation = conn
        .set_user_password(user, password)
        .with_context(|| format!("Failed to set password for {}", user))?;
    report(&operation);
    Ok(())
}

pub fn token(conn: &Connection) -> Result<()> {
    let credential = conn.credential();
    println!(
        "{}",
        serde_json::to_string_pretty(credential.info()).context("Failed to format token info")?
    );
    println!("expires at {}", credential.expires_at().to_rfc3339());
    Ok(())
}

fn report(operation: &Operation) {
    println!(
        "{} {} {} ({} -> {})",
        operation.operation_type,
        operation.name,
        operation.status,
        operation.start_time,
        operation.end_time
    );
}
