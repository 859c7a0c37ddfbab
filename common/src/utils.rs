use log::info;
use rand::prelude::*;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SECS_IN_HOUR: u64 = 60 * 60;
pub const SECS_IN_DAY: u64 = SECS_IN_HOUR * 24;

/// Exclusive lower sentinel of every name index.
pub const KEY_MIN: &str = "\u{0}";
/// Exclusive upper sentinel of every name index.
pub const KEY_MAX: &str = "\u{7f}";

pub fn get_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("Before UNIX_EPOCH")
		.as_secs()
}

pub fn get_millis() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("Before UNIX_EPOCH")
		.as_millis() as i64
}

const NAME_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-.~";

/// 12 characters out of the unreserved URI set. Used for server-assigned
/// document names and subscriber ids.
pub fn gen_resource_id() -> String {
	let mut rng = thread_rng();
	(0..12)
		.map(|_| NAME_CHARS[rng.gen_range(0..NAME_CHARS.len())] as char)
		.collect()
}

/// Resolves once the process receives SIGINT or SIGTERM.
pub async fn wait_terminate() {
	use tokio::signal::unix::{signal, SignalKind};
	let mut interrupt = signal(SignalKind::interrupt()).unwrap();
	let mut terminate = signal(SignalKind::terminate()).unwrap();
	tokio::select! {
		_ = interrupt.recv() => {
			info!("Received Interrupt, exiting.");
		}
		_ = terminate.recv() => {
			info!("Received Terminate, exiting.");
		}
	}
}
