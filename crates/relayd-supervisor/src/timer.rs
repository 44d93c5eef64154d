//! One-shot timers owned by a stream.
//!
//! A [`TimerSlot`] holds at most one pending timer. Arming it again cancels
//! the previous one, and dropping the slot cancels whatever is pending.
//! Cancellation can race the timer's own firing: an event that was already
//! delivered stays in the receiver's queue, so receivers still have to check
//! the generation carried inside the event.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct TimerSlot {
	task: Option<JoinHandle<()>>,
}

impl TimerSlot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Delivers `event` on `tx` after `delay`, replacing any pending timer.
	pub fn arm<T: Send + 'static>(&mut self, delay: Duration, tx: &UnboundedSender<T>, event: T) {
		self.cancel();
		let tx = tx.clone();
		self.task = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let _ = tx.send(event);
		}));
	}

	/// Returns true if a timer was still pending.
	pub fn cancel(&mut self) -> bool {
		match self.task.take() {
			Some(task) => {
				let pending = !task.is_finished();
				task.abort();
				pending
			}
			None => false,
		}
	}

	pub fn is_armed(&self) -> bool {
		self.task.as_ref().is_some_and(|t| !t.is_finished())
	}
}

impl Drop for TimerSlot {
	fn drop(&mut self) {
		self.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::sync::mpsc;

	#[tokio::test(start_paused = true)]
	async fn fires_after_delay() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut slot = TimerSlot::new();
		slot.arm(Duration::from_secs(30), &tx, 7u32);
		assert!(slot.is_armed());

		tokio::time::sleep(Duration::from_secs(29)).await;
		assert!(rx.try_recv().is_err());

		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(rx.recv().await, Some(7));
		assert!(!slot.is_armed());
	}

	#[tokio::test(start_paused = true)]
	async fn rearming_replaces_pending_timer() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut slot = TimerSlot::new();
		slot.arm(Duration::from_secs(10), &tx, 1u32);
		slot.arm(Duration::from_secs(20), &tx, 2u32);

		tokio::time::sleep(Duration::from_secs(25)).await;
		assert_eq!(rx.try_recv().ok(), Some(2));
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_and_drop_suppress_delivery() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut slot = TimerSlot::new();
		slot.arm(Duration::from_secs(5), &tx, 1u32);
		assert!(slot.cancel());
		assert!(!slot.cancel());

		{
			let mut dropped = TimerSlot::new();
			dropped.arm(Duration::from_secs(5), &tx, 2u32);
		}

		tokio::time::sleep(Duration::from_secs(10)).await;
		assert!(rx.try_recv().is_err());
	}
}
