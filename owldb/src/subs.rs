//! Subscription registries and the document event router.
//!
//! Registries are cheap clonable handles over an ordered index of
//! subscriber channels. `notify` runs on the writer's thread, usually
//! inside an index critical section, and performs one non-blocking send
//! per matching subscriber; the HTTP side owns disconnect detection and
//! removal.

use common::event::{frame, EventKind, EventReceiver, EventSender};
use common::index::SkipList;
use common::utils::{gen_resource_id, KEY_MAX, KEY_MIN};
use log::debug;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How long a notify sweep may scan its subscriber index.
const NOTIFY_DEADLINE: Duration = Duration::from_secs(10);

fn full_range() -> (String, String) {
	(KEY_MIN.to_string(), KEY_MAX.to_string())
}

/// Subscribers to one document, keyed by subscriber id.
#[derive(Clone)]
pub struct DocRegistry {
	subs: Arc<SkipList<String, EventSender>>,
}

impl DocRegistry {
	pub fn new() -> Self {
		Self {
			subs: Arc::new(SkipList::for_names()),
		}
	}

	pub fn add(&self) -> (String, EventReceiver) {
		let (tx, rx) = mpsc::unbounded_channel();
		let id = gen_resource_id();
		self.subs.set(id.clone(), tx);
		(id, rx)
	}

	pub fn remove(&self, id: &str) {
		if self.subs.remove(&id.to_string()).is_none() {
			debug!("Subscriber '{id}' was already gone");
		}
	}

	/// One frame to every subscriber; closed channels are skipped.
	pub fn notify(&self, kind: EventKind, payload: &[u8]) {
		let (lo, hi) = full_range();
		let subs = match self.subs.query(Instant::now() + NOTIFY_DEADLINE, &lo, &hi) {
			Ok(subs) => subs,
			Err(_) => return,
		};
		let event = frame(kind, payload);
		for (_, tx) in subs {
			let _ = tx.send(event.clone());
		}
	}
}

impl Default for DocRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Clone)]
struct RangeSubscriber {
	tx: EventSender,
	lo: String,
	hi: String,
}

/// Subscribers to a collection, each constrained to a lexicographic
/// member range.
#[derive(Clone)]
pub struct ColRegistry {
	subs: Arc<SkipList<String, RangeSubscriber>>,
}

impl ColRegistry {
	pub fn new() -> Self {
		Self {
			subs: Arc::new(SkipList::for_names()),
		}
	}

	pub fn add(&self, lo: &str, hi: &str) -> (String, EventReceiver) {
		let (tx, rx) = mpsc::unbounded_channel();
		let id = gen_resource_id();
		self.subs.set(
			id.clone(),
			RangeSubscriber {
				tx,
				lo: lo.to_string(),
				hi: hi.to_string(),
			},
		);
		(id, rx)
	}

	pub fn remove(&self, id: &str) {
		if self.subs.remove(&id.to_string()).is_none() {
			debug!("Subscriber '{id}' was already gone");
		}
	}

	/// Delivers to every subscriber whose range contains `member`.
	pub fn notify(&self, member: &str, kind: EventKind, payload: &[u8]) {
		let (lo, hi) = full_range();
		let subs = match self.subs.query(Instant::now() + NOTIFY_DEADLINE, &lo, &hi) {
			Ok(subs) => subs,
			Err(_) => return,
		};
		let event = frame(kind, payload);
		for (_, sub) in subs {
			if sub.lo.as_str() <= member && member <= sub.hi.as_str() {
				let _ = sub.tx.send(event.clone());
			}
		}
	}

	/// A delete frame to every subscriber regardless of range. Used when
	/// the whole collection or database goes away.
	pub fn notify_all(&self, payload: &[u8]) {
		let (lo, hi) = full_range();
		let subs = match self.subs.query(Instant::now() + NOTIFY_DEADLINE, &lo, &hi) {
			Ok(subs) => subs,
			Err(_) => return,
		};
		let event = frame(EventKind::Delete, payload);
		for (_, sub) in subs {
			let _ = sub.tx.send(event.clone());
		}
	}
}

impl Default for ColRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Routes document-level events by absolute URI (`<db>/<docpath>`).
/// Registries are created lazily on first subscription.
#[derive(Clone)]
pub struct Messager {
	doc_subs: Arc<SkipList<String, DocRegistry>>,
}

impl Messager {
	pub fn new() -> Self {
		Self {
			doc_subs: Arc::new(SkipList::for_names()),
		}
	}

	pub fn subscribe(&self, uri: &str) -> DocSubscription {
		let mut opened = None;
		let _ = self
			.doc_subs
			.upsert::<Infallible, _>(uri.to_string(), |_, current, _| {
				let registry = current.cloned().unwrap_or_default();
				opened = Some((registry.add(), registry.clone()));
				Ok(registry)
			});
		let ((id, rx), registry) = opened.unwrap_or_else(|| {
			let registry = DocRegistry::new();
			(registry.add(), registry)
		});
		DocSubscription { id, rx, registry }
	}

	pub fn notify(&self, uri: &str, kind: EventKind, payload: &[u8]) {
		if let Some(registry) = self.doc_subs.find(&uri.to_string()) {
			registry.notify(kind, payload);
		}
	}
}

impl Default for Messager {
	fn default() -> Self {
		Self::new()
	}
}

pub struct DocSubscription {
	pub id: String,
	pub rx: EventReceiver,
	pub registry: DocRegistry,
}

/// A live stream handed up to the HTTP façade: the delivery channel,
/// pre-framed initial events, and the hook to drop the subscriber once
/// the client goes away.
pub struct Subscription {
	pub id: String,
	pub rx: EventReceiver,
	pub initial: Vec<Vec<u8>>,
	pub guard: SubGuard,
}

pub enum SubGuard {
	Doc(DocRegistry),
	Col(ColRegistry),
}

impl SubGuard {
	pub fn unsubscribe(&self, id: &str) {
		match self {
			SubGuard::Doc(registry) => registry.remove(id),
			SubGuard::Col(registry) => registry.remove(id),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn text(ev: Vec<u8>) -> String {
		String::from_utf8(ev).unwrap()
	}

	#[test]
	fn doc_registry_delivers_to_all() {
		let registry = DocRegistry::new();
		let (_, mut rx_a) = registry.add();
		let (_, mut rx_b) = registry.add();
		registry.notify(EventKind::Update, br#"{"k":1}"#);
		assert!(text(rx_a.try_recv().unwrap()).contains("event: update"));
		assert!(text(rx_b.try_recv().unwrap()).contains(r#"data: {"k":1}"#));
	}

	#[test]
	fn removed_subscriber_gets_nothing() {
		let registry = DocRegistry::new();
		let (id, mut rx) = registry.add();
		registry.remove(&id);
		registry.notify(EventKind::Update, b"{}");
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn col_registry_filters_by_range() {
		let registry = ColRegistry::new();
		let (_, mut narrow) = registry.add("a", "c");
		let (_, mut wide) = registry.add("\u{0}", "\u{7f}");
		registry.notify("b", EventKind::Update, b"{}");
		registry.notify("z", EventKind::Update, b"{}");
		assert!(narrow.try_recv().is_ok());
		assert!(narrow.try_recv().is_err(), "'z' is outside [a,c]");
		assert!(wide.try_recv().is_ok());
		assert!(wide.try_recv().is_ok());
	}

	#[test]
	fn notify_all_ignores_ranges() {
		let registry = ColRegistry::new();
		let (_, mut narrow) = registry.add("a", "c");
		registry.notify_all(br#""/db/col""#);
		let ev = text(narrow.try_recv().unwrap());
		assert!(ev.contains("event: delete"));
		assert!(ev.contains(r#"data: "/db/col""#));
	}

	#[test]
	fn messager_routes_by_uri() {
		let messager = Messager::new();
		let mut sub = messager.subscribe("db/a/b/c");
		messager.notify("db/a/b/c", EventKind::Update, b"{}");
		messager.notify("db/other", EventKind::Update, b"{}");
		assert!(sub.rx.try_recv().is_ok());
		assert!(sub.rx.try_recv().is_err());
	}

	#[test]
	fn messager_reuses_registry_per_uri() {
		let messager = Messager::new();
		let mut first = messager.subscribe("db/x");
		let mut second = messager.subscribe("db/x");
		messager.notify("db/x", EventKind::Delete, br#""/x""#);
		assert!(first.rx.try_recv().is_ok());
		assert!(second.rx.try_recv().is_ok());
	}
}
