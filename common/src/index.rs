//! Concurrent ordered map on a lazily synchronized skip list.
//!
//! Writers latch individual nodes, readers walk atomic forward pointers,
//! and range scans detect interference through a mutation counter and
//! retry until a scan completes clean or the deadline passes.

use arc_swap::ArcSwapOption;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Instant;

use crate::error::DbError;
use crate::utils::{KEY_MAX, KEY_MIN};

const MAX_LEVEL: usize = 8;

struct Node<K, V> {
	key: K,
	/// Value slot; `None` only in the sentinels. The write guard doubles
	/// as the node latch for every structural operation.
	val: RwLock<Option<V>>,
	top_level: usize,
	fully_linked: AtomicBool,
	marked: AtomicBool,
	nexts: Vec<ArcSwapOption<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
	fn new(key: K, val: Option<V>, top_level: usize) -> Self {
		Self {
			key,
			val: RwLock::new(val),
			top_level,
			fully_linked: AtomicBool::new(false),
			marked: AtomicBool::new(false),
			nexts: (0..=top_level).map(|_| ArcSwapOption::empty()).collect(),
		}
	}
}

/**
 * An ordered map from K to V supporting concurrent readers and writers.
 *
 * Keys must lie strictly between the `min` and `max` sentinels given at
 * construction; operations on out-of-range keys report absence.
 */
pub struct SkipList<K, V> {
	head: Arc<Node<K, V>>,
	tail: Arc<Node<K, V>>,
	/// Bumped on every committed upsert and remove; `query` retries
	/// while it moves.
	mutations: AtomicU64,
}

fn random_level() -> usize {
	rand::thread_rng().gen_range(0..MAX_LEVEL)
}

fn next_is<K, V>(pred: &Arc<Node<K, V>>, level: usize, succ: &Arc<Node<K, V>>) -> bool {
	match pred.nexts[level].load_full() {
		Some(next) => Arc::ptr_eq(&next, succ),
		None => false,
	}
}

impl<K: Ord + Clone, V: Clone> SkipList<K, V> {
	pub fn new(min: K, max: K) -> Self {
		let tail = Arc::new(Node::new(max, None, MAX_LEVEL - 1));
		let head = Node::new(min, None, MAX_LEVEL - 1);
		for level in 0..MAX_LEVEL {
			head.nexts[level].store(Some(tail.clone()));
		}
		head.fully_linked.store(true, Ordering::SeqCst);
		tail.fully_linked.store(true, Ordering::SeqCst);
		Self {
			head: Arc::new(head),
			tail,
			mutations: AtomicU64::new(0),
		}
	}

	fn in_range(&self, key: &K) -> bool {
		*key > self.head.key && *key < self.tail.key
	}

	/// Records, per level, the rightmost node with key < `key` and its
	/// successor. Reports the highest level holding an exact match.
	fn search(
		&self,
		key: &K,
		preds: &mut [Arc<Node<K, V>>],
		succs: &mut [Arc<Node<K, V>>],
	) -> Option<(usize, Arc<Node<K, V>>)> {
		let mut found = None;
		let mut pred = self.head.clone();
		for level in (0..MAX_LEVEL).rev() {
			let mut curr = pred.nexts[level]
				.load_full()
				.unwrap_or_else(|| self.tail.clone());
			while curr.key < *key {
				pred = curr;
				curr = pred.nexts[level]
					.load_full()
					.unwrap_or_else(|| self.tail.clone());
			}
			if found.is_none() && curr.key == *key {
				found = Some((level, curr.clone()));
			}
			preds[level] = pred.clone();
			succs[level] = curr;
		}
		found
	}

	/// Linearizable per key with respect to completed upserts and
	/// removes on that key.
	pub fn find(&self, key: &K) -> Option<V> {
		if !self.in_range(key) {
			return None;
		}
		let mut preds = vec![self.head.clone(); MAX_LEVEL];
		let mut succs = vec![self.head.clone(); MAX_LEVEL];
		let (_, node) = self.search(key, &mut preds, &mut succs)?;
		if !node.fully_linked.load(Ordering::SeqCst) || node.marked.load(Ordering::SeqCst) {
			return None;
		}
		let val = node.val.read().unwrap().clone();
		val
	}

	/**
	 * Inserts or updates the entry at `key` as `check` decides.
	 *
	 * `check(key, current, exists)` runs while the relevant latches are
	 * held: the node's own latch when overwriting, every distinct
	 * predecessor latch when inserting. Returning an error refuses the
	 * operation and leaves the map unchanged. Structural conflicts retry
	 * internally, so the callback may run more than once, but only once
	 * per commit attempt.
	 */
	pub fn upsert<E, F>(&self, key: K, mut check: F) -> Result<bool, E>
	where
		F: FnMut(&K, Option<&V>, bool) -> Result<V, E>,
	{
		if !self.in_range(&key) {
			return Ok(false);
		}
		let top_level = random_level();
		let mut preds = vec![self.head.clone(); MAX_LEVEL];
		let mut succs = vec![self.head.clone(); MAX_LEVEL];
		loop {
			if let Some((_, found)) = self.search(&key, &mut preds, &mut succs) {
				if found.marked.load(Ordering::SeqCst) {
					// Mid-removal; wait for the unlink and retry.
					continue;
				}
				while !found.fully_linked.load(Ordering::SeqCst) {
					std::hint::spin_loop();
				}
				let mut slot = found.val.write().unwrap();
				if found.marked.load(Ordering::SeqCst) {
					continue;
				}
				let new_val = check(&key, slot.as_ref(), true)?;
				*slot = Some(new_val);
				drop(slot);
				self.mutations.fetch_add(1, Ordering::SeqCst);
				return Ok(true);
			}

			// Insert path: latch predecessors bottom-up, skipping nodes
			// that predecede at several levels.
			let mut guards: Vec<RwLockWriteGuard<Option<V>>> = Vec::with_capacity(top_level + 1);
			let mut last_locked: Option<*const Node<K, V>> = None;
			let mut valid = true;
			for level in 0..=top_level {
				let pred = &preds[level];
				let succ = &succs[level];
				let ptr = Arc::as_ptr(pred);
				if last_locked != Some(ptr) {
					guards.push(pred.val.write().unwrap());
					last_locked = Some(ptr);
				}
				valid = !pred.marked.load(Ordering::SeqCst)
					&& !succ.marked.load(Ordering::SeqCst)
					&& next_is(pred, level, succ);
				if !valid {
					break;
				}
			}
			if !valid {
				drop(guards);
				continue;
			}

			let new_val = check(&key, None, false)?;
			let node = Arc::new(Node::new(key.clone(), Some(new_val), top_level));
			for level in 0..=top_level {
				node.nexts[level].store(Some(succs[level].clone()));
			}
			for level in 0..=top_level {
				preds[level].nexts[level].store(Some(node.clone()));
			}
			node.fully_linked.store(true, Ordering::SeqCst);
			drop(guards);
			self.mutations.fetch_add(1, Ordering::SeqCst);
			return Ok(true);
		}
	}

	/// Unconditionally installs `val` at `key`.
	pub fn set(&self, key: K, val: V) {
		let _ = self.upsert::<std::convert::Infallible, _>(key, |_, _, _| Ok(val.clone()));
	}

	/// Logically deletes the entry, then unlinks it at every level.
	/// Reports the removed value, or `None` if no removable entry was
	/// present.
	pub fn remove(&self, key: &K) -> Option<V> {
		if !self.in_range(key) {
			return None;
		}
		let mut preds = vec![self.head.clone(); MAX_LEVEL];
		let mut succs = vec![self.head.clone(); MAX_LEVEL];
		let (level, victim) = self.search(key, &mut preds, &mut succs)?;
		if !victim.fully_linked.load(Ordering::SeqCst)
			|| victim.marked.load(Ordering::SeqCst)
			|| victim.top_level != level
		{
			return None;
		}

		let victim_guard = victim.val.write().unwrap();
		if victim.marked.load(Ordering::SeqCst) {
			return None;
		}
		victim.marked.store(true, Ordering::SeqCst);
		let removed = victim_guard.clone();

		loop {
			let mut guards: Vec<RwLockWriteGuard<Option<V>>> = Vec::with_capacity(victim.top_level + 1);
			let mut last_locked: Option<*const Node<K, V>> = None;
			let mut valid = true;
			for lvl in 0..=victim.top_level {
				let pred = &preds[lvl];
				let ptr = Arc::as_ptr(pred);
				if last_locked != Some(ptr) {
					guards.push(pred.val.write().unwrap());
					last_locked = Some(ptr);
				}
				valid = !pred.marked.load(Ordering::SeqCst) && next_is(pred, lvl, &victim);
				if !valid {
					break;
				}
			}
			if !valid {
				drop(guards);
				self.search(key, &mut preds, &mut succs);
				continue;
			}

			for lvl in (0..=victim.top_level).rev() {
				preds[lvl].nexts[lvl].store(victim.nexts[lvl].load_full());
			}
			drop(victim_guard);
			drop(guards);
			self.mutations.fetch_add(1, Ordering::SeqCst);
			return removed;
		}
	}

	/**
	 * Snapshot of every pair with key in `[lo, hi]`.
	 *
	 * Scans the bottom level without latching; if the mutation counter
	 * moved during the scan the result may be torn, so the scan restarts
	 * until it completes uninterrupted or `deadline` passes.
	 */
	pub fn query(&self, deadline: Instant, lo: &K, hi: &K) -> Result<Vec<(K, V)>, DbError> {
		loop {
			if Instant::now() >= deadline {
				return Err(DbError::Timeout);
			}
			let before = self.mutations.load(Ordering::SeqCst);
			let mut out = Vec::new();
			let mut curr = self.head.nexts[0].load_full();
			while let Some(node) = curr {
				if node.key >= self.tail.key || node.key > *hi {
					break;
				}
				if *lo <= node.key
					&& node.fully_linked.load(Ordering::SeqCst)
					&& !node.marked.load(Ordering::SeqCst)
				{
					if let Some(val) = node.val.read().unwrap().clone() {
						out.push((node.key.clone(), val));
					}
				}
				curr = node.nexts[0].load_full();
			}
			if self.mutations.load(Ordering::SeqCst) == before {
				return Ok(out);
			}
		}
	}
}

impl<V: Clone> SkipList<String, V> {
	/// Index over the resource-name key space.
	pub fn for_names() -> Self {
		Self::new(KEY_MIN.to_string(), KEY_MAX.to_string())
	}
}
