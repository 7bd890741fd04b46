//! Remote transport framing.
//!
//! A point-to-point delivery to another node travels as one frame:
//!
//! ```text
//! +----------------------------+-------------------------+
//! | remote port id (u32, BE)   | value bytes             |
//! +----------------------------+-------------------------+
//! ```
//!
//! Value bytes depend on the declared port type: 4 big-endian bytes for
//! `int`, 8 for `long`, raw UTF-8 for `text`, raw bytes for `object`.  The
//! receiver decodes with the kind *it* declares for the port, so a frame is
//! only accepted when its length matches that kind exactly.
//!
//! Sends are fire-and-forget.  There is no acknowledgement, retry or ordering
//! guarantee beyond single-frame atomicity.

use std::sync::Arc;

use ecubus_types::{BusError, PortId, Value, ValueKind};
use tokio::sync::mpsc;
use tracing::trace;

/// Length of the port-id header.
pub const PORT_ID_LEN: usize = 4;

/// Encode `(remote, value)` into a frame.
pub fn encode_frame(remote: PortId, value: &Value) -> Vec<u8> {
    let mut frame = Vec::with_capacity(PORT_ID_LEN + 8);
    frame.extend_from_slice(&remote.0.to_be_bytes());
    match value {
        Value::Int(v) => frame.extend_from_slice(&v.to_be_bytes()),
        Value::Long(v) => frame.extend_from_slice(&v.to_be_bytes()),
        Value::Text(s) => frame.extend_from_slice(s.as_bytes()),
        Value::Object(bytes) => frame.extend_from_slice(bytes),
    }
    frame
}

/// Read only the port-id header of `frame`.
///
/// # Errors
///
/// [`BusError::MalformedFrame`] when the frame is shorter than the header.
pub fn peek_port(frame: &[u8]) -> Result<PortId, BusError> {
    let header: [u8; PORT_ID_LEN] = frame
        .get(..PORT_ID_LEN)
        .and_then(|h| <[u8; PORT_ID_LEN]>::try_from(h).ok())
        .ok_or_else(|| {
            BusError::MalformedFrame(format!(
                "frame of {} bytes has no port id header",
                frame.len()
            ))
        })?;
    Ok(PortId(u32::from_be_bytes(header)))
}

/// Decode a frame.  `kind_for` supplies the declared value kind of the
/// addressed port.
///
/// # Errors
///
/// [`BusError::MalformedFrame`] for a missing header, a payload whose length
/// does not match a fixed-width kind, or text that is not UTF-8.  Nothing is
/// returned from a malformed frame.
pub fn decode_frame(
    frame: &[u8],
    kind_for: impl FnOnce(PortId) -> ValueKind,
) -> Result<(PortId, Value), BusError> {
    let port = peek_port(frame)?;
    let payload = &frame[PORT_ID_LEN..];
    let value = match kind_for(port) {
        ValueKind::Int => {
            let bytes: [u8; 4] = payload.try_into().map_err(|_| width_error(port, 4, payload))?;
            Value::Int(i32::from_be_bytes(bytes))
        }
        ValueKind::Long => {
            let bytes: [u8; 8] = payload.try_into().map_err(|_| width_error(port, 8, payload))?;
            Value::Long(i64::from_be_bytes(bytes))
        }
        ValueKind::Text => {
            let text = std::str::from_utf8(payload).map_err(|e| {
                BusError::MalformedFrame(format!("port {port}: text payload is not UTF-8: {e}"))
            })?;
            Value::Text(text.to_string())
        }
        ValueKind::Object => Value::Object(payload.to_vec()),
    };
    Ok((port, value))
}

fn width_error(port: PortId, expected: usize, payload: &[u8]) -> BusError {
    BusError::MalformedFrame(format!(
        "port {port}: expected {expected} payload bytes, got {}",
        payload.len()
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Links
// ─────────────────────────────────────────────────────────────────────────────

/// The external cross-node channel a frame is handed to.
pub trait RemoteLink: Send + Sync {
    /// Queue `frame` for delivery without waiting for it to be sent.
    ///
    /// # Errors
    ///
    /// [`BusError::Transport`] when the link is closed or saturated.  The
    /// frame is dropped in both cases.
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), BusError>;
}

/// In-process link backed by a bounded tokio mpsc channel.
///
/// Used for loopback wiring and as the hand-off queue in front of the
/// WebSocket writer task in [`bridge`][crate::bridge].
#[derive(Clone)]
pub struct ChannelLink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelLink {
    /// Create a link and the receiver its frames arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl RemoteLink for ChannelLink {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), BusError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BusError::Transport("remote link saturated, frame dropped".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                BusError::Transport("remote link closed".to_string())
            }
        })
    }
}

/// Serialises values and pushes them through a [`RemoteLink`].
#[derive(Clone)]
pub struct RemoteTransport {
    link: Arc<dyn RemoteLink>,
}

impl RemoteTransport {
    pub fn new(link: Arc<dyn RemoteLink>) -> Self {
        Self { link }
    }

    /// Frame `value` for `remote` and send it.
    pub fn send(&self, remote: PortId, value: &Value) -> Result<(), BusError> {
        let frame = encode_frame(remote, value);
        trace!(remote = %remote, bytes = frame.len(), "sending remote frame");
        self.link.send_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_big_endian_port_id() {
        let frame = encode_frame(PortId(0x0102_0304), &Value::Int(7));
        assert_eq!(&frame[..4], &[1, 2, 3, 4]);
        assert_eq!(&frame[4..], &[0, 0, 0, 7]);
    }

    #[test]
    fn widths_follow_declared_kind() {
        assert_eq!(encode_frame(PortId(1), &Value::Int(-1)).len(), 8);
        assert_eq!(encode_frame(PortId(1), &Value::Long(-1)).len(), 12);
        assert_eq!(encode_frame(PortId(1), &Value::from("3.4")).len(), 7);
    }

    #[test]
    fn decodes_with_receiver_kind() {
        let frame = encode_frame(PortId(9), &Value::Long(1 << 40));
        let (port, value) = decode_frame(&frame, |_| ValueKind::Long).unwrap();
        assert_eq!(port, PortId(9));
        assert_eq!(value, Value::Long(1 << 40));

        let frame = encode_frame(PortId(3), &Value::from("bw|42"));
        let (_, value) = decode_frame(&frame, |_| ValueKind::Text).unwrap();
        assert_eq!(value, Value::from("bw|42"));
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(matches!(peek_port(&[0, 1]), Err(BusError::MalformedFrame(_))));

        let frame = encode_frame(PortId(2), &Value::Int(5));
        let truncated = &frame[..6];
        assert!(matches!(
            decode_frame(truncated, |_| ValueKind::Int),
            Err(BusError::MalformedFrame(_))
        ));
        // An int frame addressed to a long port is short by four bytes.
        assert!(decode_frame(&frame, |_| ValueKind::Long).is_err());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut frame = 4u32.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0xff, 0xfe]);
        assert!(decode_frame(&frame, |_| ValueKind::Text).is_err());
        assert!(decode_frame(&frame, |_| ValueKind::Object).is_ok());
    }

    #[tokio::test]
    async fn transport_hands_frame_to_link() {
        let (link, mut rx) = ChannelLink::new(4);
        let transport = RemoteTransport::new(Arc::new(link));
        transport.send(PortId(12), &Value::Int(99)).unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(peek_port(&frame).unwrap(), PortId(12));
    }

    #[test]
    fn saturated_link_drops_frame() {
        let (link, _rx) = ChannelLink::new(1);
        link.send_frame(vec![0; 4]).unwrap();
        assert!(matches!(link.send_frame(vec![0; 4]), Err(BusError::Transport(_))));
    }

    #[test]
    fn closed_link_reports_transport_error() {
        let (link, rx) = ChannelLink::new(1);
        drop(rx);
        assert!(matches!(link.send_frame(vec![0; 4]), Err(BusError::Transport(_))));
    }
}
