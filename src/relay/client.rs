//! Client for pushing a notification into a running relay

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use super::protocol::NotificationRequest;

/// POST a notification to the relay listening on `port`.
///
/// # Arguments
/// * `port` - Port of the running relay on localhost
/// * `request` - The notification to deliver
///
/// # Returns
/// Ok(()) once the relay has answered; an error if it is unreachable
pub fn send_notification(port: u16, request: &NotificationRequest) -> Result<()> {
    let stream = TcpStream::connect(("127.0.0.1", port))
        .with_context(|| format!("Failed to connect to relay on port {port}"))?;

    stream
        .set_write_timeout(Some(Duration::from_secs(5)))
        .context("Failed to set write timeout")?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("Failed to set read timeout")?;

    send_request(stream, request)
}

fn send_request(mut stream: TcpStream, request: &NotificationRequest) -> Result<()> {
    let mut payload = serde_json::Map::new();
    payload.insert("type".into(), request.severity.as_wire().into());
    payload.insert("message".into(), request.message.clone().into());
    if let Some(description) = &request.description {
        payload.insert("description".into(), description.clone().into());
    }
    let body = serde_json::Value::Object(payload).to_string();

    write!(
        stream,
        "POST / HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .context("Failed to write request head")?;
    stream
        .write_all(body.as_bytes())
        .context("Failed to write request body")?;
    stream.flush().context("Failed to flush stream")?;

    // The relay answers every request with an empty 200
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .context("Failed to read response")?;
    if !response.starts_with("HTTP/1.1 200") {
        anyhow::bail!(
            "Unexpected response from relay: {}",
            response.lines().next().unwrap_or("")
        );
    }
    Ok(())
}
