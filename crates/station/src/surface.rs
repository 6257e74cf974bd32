//! Bridge between the firmware thread and the web server.

use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

use yaha_core::hal::{ConfigSurface, StationSnapshot};
use yaha_core::ConfigMap;

use crate::state::SharedState;

/// Firmware side of the web surface. Posts arrive over the channel fed by
/// the web handlers; snapshots go into the shared state.
///
/// Clones share the receiver so every boot of the firmware drains the same
/// queue. Lives on the firmware thread only.
#[derive(Clone)]
pub struct ChannelSurface {
    posts: Rc<RefCell<UnboundedReceiver<ConfigMap>>>,
    state: SharedState,
}

impl ChannelSurface {
    pub fn new(posts: UnboundedReceiver<ConfigMap>, state: SharedState) -> Self {
        Self {
            posts: Rc::new(RefCell::new(posts)),
            state,
        }
    }
}

impl ConfigSurface for ChannelSurface {
    fn poll_update(&mut self) -> Option<ConfigMap> {
        match self.posts.borrow_mut().try_recv() {
            Ok(config) => Some(config),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::debug!("web surface closed");
                None
            }
        }
    }

    /// Must not be called from inside the tokio runtime.
    fn publish_snapshot(&mut self, snapshot: &StationSnapshot) {
        self.state.blocking_write().record_snapshot(snapshot.clone());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
