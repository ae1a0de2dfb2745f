//! Control-socket wire format: one JSON object per line in each direction.
//!
//! ```text
//! -> {"cmd":"status"}
//! <- {"ok":true,"data":{"running":true,...}}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Attempts made by [`request_status`] while the socket is missing or refusing.
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);
/// How long a client waits for the controller to answer one request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful reply, or the controller's error message.
    pub fn into_result(self) -> Result<Value, DaemonError> {
        if self.ok {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        Err(DaemonError::Protocol(
            self.error
                .unwrap_or_else(|| "controller returned an error without a message".to_string()),
        ))
    }
}

/// Decode one request line as received by the controller.
pub fn parse_request(line: &str) -> Result<ControlRequest, DaemonError> {
    serde_json::from_str(line.trim())
        .map_err(|err| DaemonError::Protocol(format!("invalid control request: {err}")))
}

/// Send one request to the controller under `home` and wait for its reply.
pub fn send_request(home: &Path, request: ControlRequest) -> Result<ControlReply, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = connect(&socket)?;
    stream
        .set_read_timeout(Some(REPLY_TIMEOUT))
        .map_err(|e| io_err(&socket, e))?;

    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "controller closed the connection without replying".to_string(),
        ));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    UnixStream::connect(socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        }
        _ => io_err(socket, err),
    })
}

/// Status payload of the running controller. Retries briefly so a status
/// call right after `daemon start` does not race the socket bind.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let mut attempt = 1;
    loop {
        match send_request(home, ControlRequest::Status) {
            Ok(reply) => return reply.into_result(),
            Err(err @ DaemonError::DaemonNotRunning { .. }) if attempt >= STATUS_ATTEMPTS => {
                return Err(err)
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                attempt += 1;
                sleep(STATUS_RETRY_DELAY);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Ask the controller to shut down. Returns once the request is acknowledged,
/// not once the process has exited.
pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    send_request(home, ControlRequest::Stop)?
        .into_result()
        .map(|_| ())
}
