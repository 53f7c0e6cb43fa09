//! Outbound notifications and inbound control messages.
//!
//! Notifications travel over one unbounded channel so the optimizer never
//! waits on an observer. Control messages are queued and consumed only at
//! generation boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use serde_json::{Map, Value};

use crate::schema::{OptimizerEvent, Pose};

/// Sending half of the event channel.
#[derive(Debug, Default)]
pub struct EventSink {
    tx: Option<Sender<OptimizerEvent>>,
}

impl EventSink {
    /// Create a connected sink and its receiver.
    pub fn channel() -> (Self, Receiver<OptimizerEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.tx.is_some()
    }

    /// Send without blocking. A dropped receiver disconnects the sink.
    pub fn emit(&mut self, event: OptimizerEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).is_err()
        {
            self.tx = None;
        }
    }
}

/// Requests handled at the next generation boundary.
#[derive(Debug, Clone)]
pub enum Control {
    Stop,
    ArmLock,
    /// Enter high-power-keep mode, centered on the pose or on the best pair so far.
    HighPower { center: Option<Pose> },
    Parameters(Map<String, Value>),
}

/// Cloneable remote control for a running optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerHandle {
    cancelled: Arc<AtomicBool>,
    tx: Sender<Control>,
}

impl OptimizerHandle {
    pub(crate) fn new(cancelled: Arc<AtomicBool>, tx: Sender<Control>) -> Self {
        Self { cancelled, tx }
    }

    /// Request a stop. Takes effect before the next evaluation.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        let _ = self.tx.send(Control::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Arm the position lock against the best reading so far.
    pub fn arm_lock(&self) -> bool {
        self.tx.send(Control::ArmLock).is_ok()
    }

    pub fn request_high_power(&self, center: Option<Pose>) -> bool {
        self.tx.send(Control::HighPower { center }).is_ok()
    }

    /// Queue a parameter update. Returns `false` once the optimizer is gone.
    pub fn push_parameters(&self, parameters: Map<String, Value>) -> bool {
        self.tx.send(Control::Parameters(parameters)).is_ok()
    }
}

/// Pull-based source of parameter updates, polled once per generation.
pub trait ParameterSource {
    fn request(&mut self) -> Option<Map<String, Value>>;
}

impl ParameterSource for Receiver<Map<String, Value>> {
    /// Drain everything queued; later values win.
    fn request(&mut self) -> Option<Map<String, Value>> {
        let mut merged: Option<Map<String, Value>> = None;
        while let Ok(update) = self.try_recv() {
            merged.get_or_insert_with(Map::new).extend(update);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sink_disconnects_on_dropped_receiver() {
        let (mut sink, rx) = EventSink::channel();
        sink.emit(OptimizerEvent::LockArmed { reference: 1.0 });
        assert!(matches!(rx.try_recv(), Ok(OptimizerEvent::LockArmed { .. })));

        drop(rx);
        sink.emit(OptimizerEvent::LockArmed { reference: 2.0 });
        assert!(!sink.is_connected());
    }

    #[test]
    fn test_receiver_source_merges_updates() {
        let (tx, mut rx) = mpsc::channel::<Map<String, Value>>();
        assert!(rx.request().is_none());

        for update in [json!({"population_size": 20, "elite_size": 2}), json!({"population_size": 25})] {
            if let Value::Object(map) = update {
                tx.send(map).unwrap();
            }
        }
        let merged = rx.request().unwrap();
        assert_eq!(merged["population_size"], 25);
        assert_eq!(merged["elite_size"], 2);
    }

    #[test]
    fn test_handle_stop_sets_flag() {
        let (tx, rx) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(false));
        let handle = OptimizerHandle::new(Arc::clone(&flag), tx);
        handle.clone().stop();
        assert!(flag.load(Ordering::Relaxed));
        assert!(matches!(rx.try_recv(), Ok(Control::Stop)));
    }
}
