use std::borrow::Cow;

use tracing::info;

use crate::device::{Device, FormDescriptor};
use crate::hal::OutputPin;
use crate::message::{topic, ConfigMap, Message};

/// Named output pins switched from the web surface or the broker.
pub struct Switch {
    outputs: Vec<(String, Box<dyn OutputPin>)>,
}

fn key(name: &str) -> String {
    format!("switch/{name}")
}

fn state(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

impl Switch {
    pub fn new(outputs: Vec<(String, Box<dyn OutputPin>)>) -> Self {
        Self { outputs }
    }

    fn markup(&self) -> String {
        let mut html = String::from("\n<form action=\"/config/switch\" method=\"POST\">\n");
        for (name, _) in &self.outputs {
            let key = key(name);
            html.push_str(&format!(
                "<label for=\"{name}\">{name}</label>\n\
                 <input type=\"hidden\" name=\"{key}\" value=\"off\">\n\
                 <input type=\"checkbox\" id=\"{name}\" name=\"{key}\" [checked]=\"{key}\">\n"
            ));
        }
        html.push_str("<input type=\"submit\" value=\"Submit\">\n</form>\n");
        html
    }
}

impl Device for Switch {
    fn name(&self) -> &str {
        "switch"
    }

    fn set_config(&mut self, config: &ConfigMap) {
        for (name, pin) in &mut self.outputs {
            if let Some(value) = config.get(&key(name)) {
                let on = value == "on";
                if on != pin.is_set_high() {
                    info!(switch = %name, state = state(on), "switched");
                }
                pin.set(on);
            }
        }
    }

    fn get_config(&mut self) -> ConfigMap {
        self.outputs
            .iter()
            .map(|(name, pin)| (key(name), state(pin.is_set_high()).to_string()))
            .collect()
    }

    fn outgoing_messages(&mut self, base_topic: &str) -> Vec<Message> {
        self.outputs
            .iter()
            .map(|(name, pin)| Message::new(topic(base_topic, &key(name)), state(pin.is_set_high())))
            .collect()
    }

    fn form(&self) -> Option<FormDescriptor> {
        if self.outputs.is_empty() {
            return None;
        }
        Some(FormDescriptor {
            markup: Cow::Owned(self.markup()),
            route: "switch",
            menu_label: "Switches",
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockOutputPin;

    fn switch() -> (Switch, MockOutputPin) {
        let pin = MockOutputPin::new("D6");
        (
            Switch::new(vec![("D6".into(), Box::new(pin.clone()) as Box<dyn OutputPin>)]),
            pin,
        )
    }

    #[test]
    fn on_and_off_drive_the_pin() {
        let (mut s, pin) = switch();
        s.set_config(&ConfigMap::from([("switch/D6".into(), "on".into())]));
        assert_eq!(s.get_config()["switch/D6"], "on");
        s.set_config(&ConfigMap::from([("switch/D6".into(), "off".into())]));
        assert_eq!(pin.history(), vec![true, false]);
    }

    #[test]
    fn unrelated_keys_leave_pins_alone() {
        let (mut s, pin) = switch();
        s.set_config(&ConfigMap::from([("switch/D7".into(), "on".into())]));
        assert!(pin.history().is_empty());
    }

    #[test]
    fn form_lists_every_switch() {
        let (s, _) = switch();
        let form = s.form().unwrap();
        assert!(form.markup.contains("[checked]=\"switch/D6\""));
        assert!(Switch::new(Vec::new()).form().is_none());
    }

    #[test]
    fn state_is_published() {
        let (mut s, _) = switch();
        let msgs = s.outgoing_messages("garden");
        assert_eq!(msgs[0].topic, "garden/switch/D6");
        assert_eq!(msgs[0].value, "off");
    }
}
