//! The live half of a subscribe GET: headers are flushed, initial
//! snapshot events go out, then a task forwards frames from the
//! delivery channel until the client disconnects, the process shuts
//! down, or the resource's registry drops the channel.

use axum::body::StreamBody;
use axum::response::Response;
use common::event::KEEP_ALIVE;
use hyper::{header, StatusCode};
use log::{debug, info};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_stream::wrappers::ReceiverStream;

use crate::subs::Subscription;

const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(15);

/// Turns a successful subscribe GET into a `text/event-stream`
/// response. Disconnect shows up as a failed body send, at the latest
/// at the next keep-alive tick, and removes the subscriber.
pub fn sse_response(sub: Subscription, mut shutdown: watch::Receiver<()>) -> Response {
	let (tx, rx) = mpsc::channel::<Result<Vec<u8>, Infallible>>(16);

	tokio::spawn(async move {
		let Subscription {
			id,
			rx: mut events,
			initial,
			guard,
		} = sub;

		for event in initial {
			if tx.send(Ok(event)).await.is_err() {
				guard.unsubscribe(&id);
				return;
			}
		}

		let mut ticker = time::interval(KEEP_ALIVE_PERIOD);
		ticker.reset();
		loop {
			tokio::select! {
				event = events.recv() => {
					match event {
						Some(event) => {
							if tx.send(Ok(event)).await.is_err() {
								info!("Client of subscription '{id}' disconnected");
								break;
							}
						}
						None => {
							debug!("Subscription '{id}' channel closed by its registry");
							break;
						}
					}
				}
				_ = ticker.tick() => {
					if tx.send(Ok(KEEP_ALIVE.to_vec())).await.is_err() {
						info!("Client of subscription '{id}' disconnected");
						break;
					}
				}
				_ = shutdown.changed() => {
					break;
				}
			}
		}
		guard.unsubscribe(&id);
	});

	hyper::Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, "text/event-stream")
		.header(header::CACHE_CONTROL, "no-cache")
		.header(header::CONNECTION, "keep-alive")
		.header(
			header::ACCESS_CONTROL_ALLOW_HEADERS,
			"Content-Type, Authorization, Last-Event-ID",
		)
		.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
		.body(axum::body::boxed(StreamBody::new(ReceiverStream::new(rx))))
		.unwrap()
}
