// ABOUTME: Hands inbound events from the gateway to the dispatcher
// ABOUTME: Either straight away on a fresh task or through the lossy event ring

use burrow_core::task::spawn_isolated;
use burrow_core::{EventRing, RingDrain};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;
use crate::gateway::{ApiCaller, EventSink};

/// One event waiting in the ring, with the connection it arrived on.
pub struct InboundEvent {
    pub payload: Value,
    pub caller: Arc<dyn ApiCaller>,
}

pub enum EventIngress {
    /// Every event gets its own task, optionally after a fixed delay.
    Direct {
        latency: Duration,
        dispatcher: Arc<Dispatcher>,
    },
    /// Events wait in the ring until the drain ticker picks them up.
    Ring { ring: Arc<EventRing<InboundEvent>> },
}

impl EventIngress {
    /// A `ring_len` of zero selects direct dispatch. In ring mode the drain
    /// loop is spawned and its handle returned.
    pub fn start(
        ring_len: usize,
        latency: Duration,
        dispatcher: Arc<Dispatcher>,
    ) -> (Self, Option<JoinHandle<()>>) {
        if ring_len == 0 {
            tracing::info!(latency_ms = latency.as_millis() as u64, "Dispatching events directly");
            return (
                EventIngress::Direct {
                    latency,
                    dispatcher,
                },
                None,
            );
        }

        let ring = Arc::new(EventRing::new(ring_len));
        let drain = ring.drain();
        let handle = tokio::spawn(run_drain(drain, latency, dispatcher));
        tracing::info!(
            ring_len,
            interval_ms = latency.as_millis() as u64,
            "Dispatching events through the ring"
        );
        (EventIngress::Ring { ring }, Some(handle))
    }

    /// Events lost to ring overwrites so far; always zero in direct mode.
    pub fn dropped(&self) -> u64 {
        match self {
            EventIngress::Direct { .. } => 0,
            EventIngress::Ring { ring } => ring.dropped(),
        }
    }
}

async fn run_drain(drain: RingDrain<InboundEvent>, interval: Duration, dispatcher: Arc<Dispatcher>) {
    drain
        .run(interval, |event| {
            let dispatcher = Arc::clone(&dispatcher);
            spawn_isolated("dispatch", async move {
                dispatcher.dispatch(event.payload, event.caller);
            });
        })
        .await
}

impl EventSink for EventIngress {
    fn submit(&self, payload: Value, caller: Arc<dyn ApiCaller>) {
        match self {
            EventIngress::Direct {
                latency,
                dispatcher,
            } => {
                let latency = *latency;
                let dispatcher = Arc::clone(dispatcher);
                spawn_isolated("dispatch", async move {
                    if !latency.is_zero() {
                        tokio::time::sleep(latency).await;
                    }
                    dispatcher.dispatch(payload, caller);
                });
            }
            EventIngress::Ring { ring } => ring.push(InboundEvent { payload, caller }),
        }
    }
}
