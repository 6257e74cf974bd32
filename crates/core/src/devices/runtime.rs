use std::time::Instant;

use crate::device::Device;
use crate::message::{topic, Message};

/// Reports how long the station has been awake.
pub struct Runtime {
    started: Instant,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Runtime {
    fn name(&self) -> &str {
        "runtime"
    }

    fn outgoing_messages(&mut self, base_topic: &str) -> Vec<Message> {
        let secs = self.started.elapsed().as_secs_f32();
        vec![Message::new(topic(base_topic, "runtime"), format!("{secs:.2}"))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_is_published_in_seconds() {
        let mut rt = Runtime::new();
        let msgs = rt.outgoing_messages("garden");
        assert_eq!(msgs[0].topic, "garden/runtime");
        assert!(msgs[0].value.parse::<f32>().unwrap() >= 0.0);
    }
}
