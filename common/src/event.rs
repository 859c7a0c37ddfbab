use tokio::sync::mpsc;

use crate::utils::get_millis;

/// What happened to the resource an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
	Update,
	Delete,
}

impl EventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventKind::Update => "update",
			EventKind::Delete => "delete",
		}
	}
}

/// Subscriber channels carry fully formatted SSE frames. Senders never
/// block; a gone receiver just makes the send fail and the frame drop.
pub type EventSender = mpsc::UnboundedSender<Vec<u8>>;
pub type EventReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Comment frame written on idle streams so proxies keep them open.
pub const KEEP_ALIVE: &[u8] = b":keep-alive\n\n";

/// Formats one server-sent event. The `id` field carries the send time
/// in milliseconds since epoch.
pub fn frame(kind: EventKind, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() + 48);
	out.extend_from_slice(b"event: ");
	out.extend_from_slice(kind.as_str().as_bytes());
	out.extend_from_slice(b"\ndata: ");
	out.extend_from_slice(payload);
	out.extend_from_slice(b"\nid: ");
	out.extend_from_slice(get_millis().to_string().as_bytes());
	out.extend_from_slice(b"\n\n");
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frame_layout() {
		let ev = frame(EventKind::Update, br#"{"a":1}"#);
		let text = String::from_utf8(ev).unwrap();
		assert!(text.starts_with("event: update\ndata: {\"a\":1}\nid: "));
		assert!(text.ends_with("\n\n"));
	}

	#[test]
	fn delete_frame_names_the_event() {
		let ev = frame(EventKind::Delete, br#""/""#);
		let text = String::from_utf8(ev).unwrap();
		assert!(text.starts_with("event: delete\n"));
	}
}
