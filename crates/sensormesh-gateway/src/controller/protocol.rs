//! Controller line protocol
//!
//! One message per line, six `;`-separated fields:
//!
//! ```text
//! node-id;child-id;command;ack;type;payload
//! ```
//!
//! Towards the controller `node-id` is the sender and `ack` is the echo
//! flag. From the controller `node-id` is the destination and `ack` asks the
//! node to echo the message. The payload is the rest of the line; binary
//! payloads and text containing control characters are written as uppercase
//! hex so a payload can never span lines.

use crate::error::{GatewayError, Result};
use crate::message::{Command, Message};

/// Field separator
pub const SEPARATOR: char = ';';

/// Number of fields in a line
const FIELD_COUNT: usize = 6;

/// Format a message for the controller (without line terminator)
pub fn encode_line(message: &Message) -> String {
    let text = message
        .payload_str()
        .filter(|text| !text.chars().any(char::is_control));
    let payload = match text {
        Some(text) => text.to_string(),
        None => hex::encode_upper(message.payload().as_bytes()),
    };

    format!(
        "{sender}{s}{child}{s}{command}{s}{ack}{s}{ty}{s}{payload}",
        s = SEPARATOR,
        sender = message.sender,
        child = message.child,
        command = message.command as u8,
        ack = u8::from(message.echo),
        ty = message.msg_type,
    )
}

/// Parse a controller command line into a message from the gateway
pub fn parse_line(line: &str) -> Result<Message> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(GatewayError::InvalidLine("empty line".to_string()));
    }

    let fields: Vec<&str> = line.splitn(FIELD_COUNT, SEPARATOR).collect();
    if fields.len() != FIELD_COUNT {
        return Err(GatewayError::InvalidLine(format!(
            "expected {} fields, got {}: {:?}",
            FIELD_COUNT,
            fields.len(),
            line
        )));
    }

    let destination = parse_field(fields[0], "node-id")?;
    let child = parse_field(fields[1], "child-id")?;
    let command = Command::try_from(parse_field(fields[2], "command")?)?;
    let request_ack = match parse_field(fields[3], "ack")? {
        0 => false,
        1 => true,
        other => {
            return Err(GatewayError::InvalidLine(format!(
                "ack must be 0 or 1, got {}",
                other
            )))
        }
    };
    let msg_type = parse_field(fields[4], "type")?;

    Message::new(destination, child, command, msg_type)
        .with_ack_request(request_ack)
        .with_text(fields[5])
}

fn parse_field(field: &str, name: &str) -> Result<u8> {
    field
        .trim()
        .parse::<u8>()
        .map_err(|e| GatewayError::InvalidLine(format!("bad {} {:?}: {}", name, field, e)))
}
