//! The connect/disconnect control pair.

/// Element id of the connect control.
pub const CONNECT_CONTROL: &str = "wsConnect";
/// Element id of the disconnect control.
pub const DISCONNECT_CONTROL: &str = "wsDisconnect";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub id: &'static str,
    pub disabled: bool,
}

impl Control {
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }
}

/// Two controls of which exactly one is enabled.
///
/// The pair starts in the "disconnected" layout and `set_connected` is its
/// only mutator, so the invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPair {
    connect: Control,
    disconnect: Control,
}

impl Default for ControlPair {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPair {
    pub fn new() -> Self {
        Self {
            connect: Control {
                id: CONNECT_CONTROL,
                disabled: false,
            },
            disconnect: Control {
                id: DISCONNECT_CONTROL,
                disabled: true,
            },
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connect.disabled = connected;
        self.disconnect.disabled = !connected;
    }

    pub fn connect(&self) -> Control {
        self.connect
    }

    pub fn disconnect(&self) -> Control {
        self.disconnect
    }

    /// Whether the pair currently shows the "connected" layout.
    pub fn shows_connected(&self) -> bool {
        self.disconnect.is_enabled()
    }

    pub fn enabled_count(&self) -> usize {
        [self.connect, self.disconnect]
            .iter()
            .filter(|c| c.is_enabled())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let pair = ControlPair::new();
        assert!(pair.connect().is_enabled());
        assert!(!pair.disconnect().is_enabled());
        assert_eq!(pair.enabled_count(), 1);
    }

    #[test]
    fn set_connected_flips_both() {
        let mut pair = ControlPair::new();
        pair.set_connected(true);
        assert!(pair.connect().disabled);
        assert!(!pair.disconnect().disabled);
        assert!(pair.shows_connected());
        assert_eq!(pair.enabled_count(), 1);
    }

    #[test]
    fn round_trip_restores_original() {
        let original = ControlPair::new();
        let mut pair = original.clone();
        pair.set_connected(true);
        pair.set_connected(false);
        assert_eq!(pair, original);
    }

    #[test]
    fn set_connected_is_idempotent() {
        let mut pair = ControlPair::new();
        pair.set_connected(true);
        let once = pair.clone();
        pair.set_connected(true);
        assert_eq!(pair, once);
    }

    #[test]
    fn controls_carry_element_ids() {
        let pair = ControlPair::new();
        assert_eq!(pair.connect().id, "wsConnect");
        assert_eq!(pair.disconnect().id, "wsDisconnect");
    }
}
