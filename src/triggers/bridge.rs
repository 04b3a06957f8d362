//! Cross-context bridge payloads.
//!
//! Messages arrive as untyped JSON from the embedding shell. They are
//! decoded here, once, into [`BridgeMessage`]; anything that does not
//! decode is ignored and never travels further.

use serde::Deserialize;

/// Recognized bridge payloads, discriminated by their `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    /// Hardware button on a paired headset was pressed.
    #[serde(rename = "bluetoothButtonPress")]
    ButtonPress,
}

/// Decode a raw payload. `None` means "not for us".
pub fn decode(payload: &str) -> Option<BridgeMessage> {
    serde_json::from_str(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BRIDGE_BUTTON_PRESS_TYPE;

    #[test]
    fn button_press_decodes() {
        let payload = format!(r#"{{"type":"{}"}}"#, BRIDGE_BUTTON_PRESS_TYPE);
        assert_eq!(decode(&payload), Some(BridgeMessage::ButtonPress));
    }

    #[test]
    fn extra_fields_are_tolerated() {
        assert_eq!(
            decode(r#"{"type":"bluetoothButtonPress","device":"Z40"}"#),
            Some(BridgeMessage::ButtonPress)
        );
    }

    #[test]
    fn other_shapes_are_ignored() {
        assert_eq!(decode(r#"{"type":"other"}"#), None);
        assert_eq!(decode(r#"{"kind":"bluetoothButtonPress"}"#), None);
        assert_eq!(decode(r#""bluetoothButtonPress""#), None);
        assert_eq!(decode("not json at all"), None);
        assert_eq!(decode(""), None);
    }
}
