//! In-memory secure proxy.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tisci_core::{DEFAULT_MAX_MESSAGE_SIZE, ProxyThread, SecureProxy, TransportError};
use tisci_proto::{MessageHeader, MessageType};

use crate::clock::ManualClock;

/// Produces the frames the far side sends back for one request.
pub trait Responder: Send + Sync {
    /// Frames to queue on the receive thread in reply to `request`.
    fn respond(&self, request: &[u8]) -> Vec<Vec<u8>>;
}

#[derive(Debug, Default)]
struct ProxyState {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<(ProxyThread, Vec<u8>)>,
    inits: usize,
    fail_send: Option<TransportError>,
    fail_receive: Option<TransportError>,
}

/// Secure proxy double.
///
/// Records every sent buffer, hands out queued inbound frames in order, and
/// advances the shared [`ManualClock`] by the full timeout whenever a
/// receive finds nothing, so waits cost no wall-clock time.
pub struct ScriptedProxy {
    clock: Arc<ManualClock>,
    responder: Option<Arc<dyn Responder>>,
    max_message_size: usize,
    state: Mutex<ProxyState>,
}

impl ScriptedProxy {
    /// Proxy with no responder; inbound frames come only from
    /// [`ScriptedProxy::push_inbound`].
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            responder: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            state: Mutex::new(ProxyState::default()),
        }
    }

    /// Answer every sent request through `responder`.
    #[must_use]
    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Override the per-message capacity.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Queue a frame on the receive thread.
    pub fn push_inbound(&self, frame: Vec<u8>) {
        self.state().inbound.push_back(frame);
    }

    /// Fail the next send with `error`.
    pub fn fail_next_send(&self, error: TransportError) {
        self.state().fail_send = Some(error);
    }

    /// Fail the next receive with `error`.
    pub fn fail_next_receive(&self, error: TransportError) {
        self.state().fail_receive = Some(error);
    }

    /// Every buffer sent so far, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.iter().map(|(_, bytes)| bytes.clone()).collect()
    }

    /// Number of buffers sent.
    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    /// Number of sent buffers whose header carries `message_type`.
    pub fn sent_of_type(&self, message_type: MessageType) -> usize {
        self.state()
            .sent
            .iter()
            .filter(|(_, bytes)| {
                MessageHeader::peek(bytes).is_ok_and(|h| h.message_type() == Some(message_type))
            })
            .count()
    }

    /// Threads sent on, in order.
    pub fn sent_threads(&self) -> Vec<ProxyThread> {
        self.state().sent.iter().map(|(thread, _)| *thread).collect()
    }

    /// Number of `init` calls.
    pub fn init_count(&self) -> usize {
        self.state().inits
    }

    /// Frames still waiting to be received.
    pub fn pending_inbound(&self) -> usize {
        self.state().inbound.len()
    }

    fn state(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SecureProxy for ScriptedProxy {
    fn init(&self) -> Result<(), TransportError> {
        self.state().inits += 1;
        Ok(())
    }

    fn send(&self, thread: ProxyThread, message: &[u8]) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            if let Some(error) = state.fail_send.take() {
                return Err(error);
            }
            state.sent.push((thread, message.to_vec()));
        }

        if let Some(responder) = &self.responder {
            let replies = responder.respond(message);
            self.state().inbound.extend(replies);
        }
        Ok(())
    }

    fn receive(
        &self,
        _thread: ProxyThread,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let mut state = self.state();
        if let Some(error) = state.fail_receive.take() {
            return Err(error);
        }
        let frame = state.inbound.pop_front();
        drop(state);

        if frame.is_none() {
            self.clock.advance(timeout);
        }
        Ok(frame)
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}
