//! In-memory link used by tests and dry runs.
//!
//! Records every line written to it and lets the test inject inbound lines.
//! An optional responder hook answers writes (e.g. `ready` after
//! `connection.isready`), and writes can be made to fail on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use kevinbot_types::{ComError, Link};
use tokio::sync::mpsc;

use crate::adapter::{INBOUND_CAPACITY, Inbound, InboundFrames, LinkWriter};

/// Reply hook: given a written line, optionally produce an inbound line.
pub type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

pub struct MemoryLink {
    link: Link,
    sent: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<Option<mpsc::Sender<Inbound>>>,
    responder: Mutex<Option<Responder>>,
    fail_writes: AtomicBool,
    flushes: AtomicUsize,
}

impl MemoryLink {
    pub fn new(link: Link) -> (Arc<Self>, InboundFrames) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let memory = Arc::new(Self {
            link,
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(Some(tx)),
            responder: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            flushes: AtomicUsize::new(0),
        });
        (memory, rx)
    }

    /// Queue raw bytes as if they had been read from the wire.
    pub fn inject_bytes(&self, bytes: impl Into<Vec<u8>>) -> Result<(), ComError> {
        self.inject_item(Ok(bytes.into()))
    }

    /// Queue a line as if it had been read from the wire.
    pub fn inject(&self, line: &str) -> Result<(), ComError> {
        self.inject_bytes(line.as_bytes())
    }

    /// Queue a reader fault.
    pub fn inject_error(&self, error: ComError) -> Result<(), ComError> {
        self.inject_item(Err(error))
    }

    fn inject_item(&self, item: Inbound) -> Result<(), ComError> {
        let inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = inbound
            .as_ref()
            .ok_or_else(|| ComError::Channel(format!("{} link disconnected", self.link)))?;
        sender
            .try_send(item)
            .map_err(|e| ComError::Channel(format!("{} inbound: {e}", self.link)))
    }

    /// Close the inbound side; the reader sees end-of-stream.
    pub fn disconnect(&self) {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(responder));
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every line written so far, raw.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every line written so far, without terminators.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|line| String::from_utf8_lossy(line).trim_end_matches(['\r', '\n']).to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl LinkWriter for MemoryLink {
    fn link(&self) -> Link {
        self.link
    }

    fn send(&self, line: &[u8]) -> Result<(), ComError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ComError::io(self.link, "injected write failure"));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_vec());

        let reply = self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|respond| respond(line));
        if let Some(reply) = reply {
            self.inject_bytes(reply)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), ComError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sent_frames_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let (link, _rx) = MemoryLink::new(Link::Core);
        link.send_frame("system.estop", "")?;
        link.send_frame("kevinbot.enabled", "false")?;
        assert_eq!(link.sent_lines(), vec!["system.estop", "kevinbot.enabled=false"]);
        Ok(())
    }

    #[tokio::test]
    async fn responder_replies_on_inbound() -> Result<(), Box<dyn std::error::Error>> {
        let (link, mut rx) = MemoryLink::new(Link::Core);
        link.set_responder(|line| (line == b"connection.isready\n").then(|| b"ready\n".to_vec()));
        link.send_frame("connection.isready", "")?;
        link.send_frame("system.tick", "")?;

        let reply = rx.recv().await.ok_or("no reply")??;
        assert_eq!(reply, b"ready\n");
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn injected_write_failure_is_an_io_error() {
        let (link, _rx) = MemoryLink::new(Link::Remote);
        link.set_fail_writes(true);
        assert!(matches!(
            link.send_frame("kevinbot.enabled", "false"),
            Err(ComError::Io { link: Link::Remote, .. })
        ));
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn disconnect_ends_the_stream() {
        let (link, mut rx) = MemoryLink::new(Link::Eye);
        link.disconnect();
        assert!(rx.recv().await.is_none());
        assert!(link.inject("eye_settings.x=1").is_err());
    }
}
