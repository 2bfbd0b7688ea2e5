//! IPC message types and framing for the daemon's event pipe.
//!
//! Every message is a self-delimiting frame:
//!
//! ```text
//! [u8: version][u8: type len][type bytes (UTF-8)][u32 LE: payload len][payload]
//! ```
//!
//! The set of message types is closed and versioned together with the
//! daemon. A frame with an unknown type is reported as an error, but only
//! after the whole frame has been consumed, so the caller may keep reading.

use crate::config::IpcConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const P2P_LISTEN_ADDR: &str = "p2plistenaddr";
const RPC_LISTEN_ADDR: &str = "rpclistenaddr";
const LIFETIME_EVENT: &str = "lifetimeevent";

/// Stage of the daemon's lifetime reported by a `lifetimeevent` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimePhase {
    Startup,
    StartupComplete,
    Shutdown,
}

impl LifetimePhase {
    fn as_byte(self) -> u8 {
        match self {
            LifetimePhase::Startup => 0,
            LifetimePhase::StartupComplete => 1,
            LifetimePhase::Shutdown => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(LifetimePhase::Startup),
            1 => Some(LifetimePhase::StartupComplete),
            2 => Some(LifetimePhase::Shutdown),
            _ => None,
        }
    }
}

/// A decoded message from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcEvent {
    /// The peer-to-peer listener is bound to this `host:port`.
    P2pListenAddr(String),
    /// The RPC listener is bound to this `host:port`.
    RpcListenAddr(String),
    /// Lifetime progress, with the daemon's subsystem action code.
    Lifetime { phase: LifetimePhase, action: u8 },
}

impl IpcEvent {
    /// The wire name of this message type.
    pub fn msg_type(&self) -> &'static str {
        match self {
            IpcEvent::P2pListenAddr(_) => P2P_LISTEN_ADDR,
            IpcEvent::RpcListenAddr(_) => RPC_LISTEN_ADDR,
            IpcEvent::Lifetime { .. } => LIFETIME_EVENT,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            IpcEvent::P2pListenAddr(addr) | IpcEvent::RpcListenAddr(addr) => {
                addr.as_bytes().to_vec()
            }
            IpcEvent::Lifetime { phase, action } => vec![phase.as_byte(), *action],
        }
    }

    /// Encode this event as one complete frame.
    ///
    /// Fails with `PayloadTooLarge` for payloads the decoder would reject.
    pub fn encode(&self) -> Result<Vec<u8>, IpcError> {
        let msg_type = self.msg_type().as_bytes();
        let payload = self.payload();

        let too_large = || IpcError::PayloadTooLarge {
            size: payload.len(),
            max: IpcConfig::MAX_PAYLOAD_SIZE,
        };
        if payload.len() > IpcConfig::MAX_PAYLOAD_SIZE {
            return Err(too_large());
        }
        let payload_len = u32::try_from(payload.len()).map_err(|_| too_large())?;
        let type_len = u8::try_from(msg_type.len()).map_err(|_| IpcError::InvalidPayload {
            msg_type: self.msg_type().to_string(),
            reason: "message type longer than 255 bytes".to_string(),
        })?;

        let mut frame = Vec::with_capacity(2 + msg_type.len() + 4 + payload.len());
        frame.push(IpcConfig::PROTOCOL_VERSION);
        frame.push(type_len);
        frame.extend_from_slice(msg_type);
        frame.extend_from_slice(&payload_len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    fn decode(msg_type: String, payload: Vec<u8>) -> Result<Self, IpcError> {
        match msg_type.as_str() {
            P2P_LISTEN_ADDR => Ok(IpcEvent::P2pListenAddr(utf8_payload(msg_type, payload)?)),
            RPC_LISTEN_ADDR => Ok(IpcEvent::RpcListenAddr(utf8_payload(msg_type, payload)?)),
            LIFETIME_EVENT => match payload[..] {
                [phase, action] => match LifetimePhase::from_byte(phase) {
                    Some(phase) => Ok(IpcEvent::Lifetime { phase, action }),
                    None => Err(IpcError::InvalidPayload {
                        msg_type,
                        reason: format!("unknown lifetime event {}", phase),
                    }),
                },
                _ => Err(IpcError::InvalidPayload {
                    msg_type,
                    reason: format!("expected 2 bytes, got {}", payload.len()),
                }),
            },
            _ => Err(IpcError::UnknownType(msg_type)),
        }
    }
}

fn utf8_payload(msg_type: String, payload: Vec<u8>) -> Result<String, IpcError> {
    String::from_utf8(payload).map_err(|e| IpcError::InvalidPayload {
        msg_type,
        reason: e.to_string(),
    })
}

/// Failure to read or write an IPC message.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The pipe closed cleanly between frames.
    #[error("IPC stream closed")]
    Eof,

    #[error("IPC I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported IPC protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("IPC payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Unknown IPC message type {0:?}")]
    UnknownType(String),

    #[error("Invalid {msg_type} payload: {reason}")]
    InvalidPayload { msg_type: String, reason: String },
}

impl IpcError {
    /// Whether this is the normal end of the stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, IpcError::Eof)
    }

    /// Whether the offending frame was fully consumed, leaving the stream
    /// positioned at the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IpcError::UnknownType(_) | IpcError::InvalidPayload { .. }
        )
    }
}

/// Read and decode the next framed message.
///
/// Returns `IpcError::Eof` when the pipe closes at a frame boundary. EOF in
/// the middle of a frame is reported as `IpcError::Io`.
pub async fn next_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<IpcEvent, IpcError> {
    let version = match reader.read_u8().await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(IpcError::Eof),
        Err(e) => return Err(e.into()),
    };
    if version != IpcConfig::PROTOCOL_VERSION {
        return Err(IpcError::UnsupportedVersion(version));
    }

    let type_len = reader.read_u8().await? as usize;
    let mut type_buf = vec![0u8; type_len];
    reader.read_exact(&mut type_buf).await?;

    let payload_len = reader.read_u32_le().await? as usize;
    if payload_len > IpcConfig::MAX_PAYLOAD_SIZE {
        return Err(IpcError::PayloadTooLarge {
            size: payload_len,
            max: IpcConfig::MAX_PAYLOAD_SIZE,
        });
    }
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    let msg_type = String::from_utf8_lossy(&type_buf).into_owned();
    IpcEvent::decode(msg_type, payload)
}

/// Encode and write one message, flushing the writer.
///
/// Nothing is written if the event cannot be encoded.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    event: &IpcEvent,
) -> Result<(), IpcError> {
    let frame = event.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
