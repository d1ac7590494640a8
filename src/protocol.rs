use serde::Deserialize;
use serde_json::Value;

/// Control endpoint path on the receiver.
pub const CONTROL_PATH: &str = "/remoteControl/cmd";

// Operation codes are string-typed on the wire.
pub const OPERATION_INFORMATION: &str = "10";
pub const OPERATION_KEYPRESS: &str = "01";
pub const OPERATION_CHANNEL_CHANGE: &str = "09";

pub const DEFAULT_PORT: u16 = 8080;

/// Remote-control keys understood by the receiver.
///
/// The table is closed: unknown key names are rejected locally, before
/// any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Power,
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    ChannelUp,
    ChannelDown,
    VolumeUp,
    VolumeDown,
    Mute,
    Up,
    Down,
    Left,
    Right,
    Ok,
    Back,
    Menu,
    PlayPause,
    FastBackward,
    FastForward,
    Record,
    Vod,
}

impl Key {
    pub const ALL: &[Key] = &[
        Key::Power,
        Key::Digit0,
        Key::Digit1,
        Key::Digit2,
        Key::Digit3,
        Key::Digit4,
        Key::Digit5,
        Key::Digit6,
        Key::Digit7,
        Key::Digit8,
        Key::Digit9,
        Key::ChannelUp,
        Key::ChannelDown,
        Key::VolumeUp,
        Key::VolumeDown,
        Key::Mute,
        Key::Up,
        Key::Down,
        Key::Left,
        Key::Right,
        Key::Ok,
        Key::Back,
        Key::Menu,
        Key::PlayPause,
        Key::FastBackward,
        Key::FastForward,
        Key::Record,
        Key::Vod,
    ];

    /// Numeric key code sent in the `key` query parameter.
    pub fn code(&self) -> u16 {
        match self {
            Key::Power => 116,
            Key::Digit0 => 512,
            Key::Digit1 => 513,
            Key::Digit2 => 514,
            Key::Digit3 => 515,
            Key::Digit4 => 516,
            Key::Digit5 => 517,
            Key::Digit6 => 518,
            Key::Digit7 => 519,
            Key::Digit8 => 520,
            Key::Digit9 => 521,
            Key::ChannelUp => 402,
            Key::ChannelDown => 403,
            Key::VolumeUp => 115,
            Key::VolumeDown => 114,
            Key::Mute => 113,
            Key::Up => 103,
            Key::Down => 108,
            Key::Left => 105,
            Key::Right => 106,
            Key::Ok => 352,
            Key::Back => 158,
            Key::Menu => 139,
            Key::PlayPause => 164,
            Key::FastBackward => 168,
            Key::FastForward => 159,
            Key::Record => 167,
            Key::Vod => 393,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Key::Power => "POWER",
            Key::Digit0 => "0",
            Key::Digit1 => "1",
            Key::Digit2 => "2",
            Key::Digit3 => "3",
            Key::Digit4 => "4",
            Key::Digit5 => "5",
            Key::Digit6 => "6",
            Key::Digit7 => "7",
            Key::Digit8 => "8",
            Key::Digit9 => "9",
            Key::ChannelUp => "CH+",
            Key::ChannelDown => "CH-",
            Key::VolumeUp => "VOL+",
            Key::VolumeDown => "VOL-",
            Key::Mute => "MUTE",
            Key::Up => "UP",
            Key::Down => "DOWN",
            Key::Left => "LEFT",
            Key::Right => "RIGHT",
            Key::Ok => "OK",
            Key::Back => "BACK",
            Key::Menu => "MENU",
            Key::PlayPause => "PLAY/PAUSE",
            Key::FastBackward => "FBWD",
            Key::FastForward => "FFWD",
            Key::Record => "REC",
            Key::Vod => "VOD",
        }
    }

    pub fn from_name(name: &str) -> Option<Key> {
        Key::ALL.iter().copied().find(|k| k.name() == name)
    }
}

/// Keypress modes: tap, long press, release after long press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPressMode {
    #[default]
    Tap,
    Hold,
    Release,
}

impl KeyPressMode {
    pub fn code(&self) -> u8 {
        match self {
            KeyPressMode::Tap => 0,
            KeyPressMode::Hold => 1,
            KeyPressMode::Release => 2,
        }
    }
}

/// The `epg_id` query parameter must be 10 chars, left-padded with `*`.
pub fn pad_epg_id(id: &str) -> String {
    format!("{id:*>10}")
}

pub fn status_query() -> Vec<(&'static str, String)> {
    vec![("operation", OPERATION_INFORMATION.to_string())]
}

pub fn keypress_query(key: Key, mode: KeyPressMode) -> Vec<(&'static str, String)> {
    vec![
        ("operation", OPERATION_KEYPRESS.to_string()),
        ("key", key.code().to_string()),
        ("mode", mode.code().to_string()),
    ]
}

pub fn channel_change_query(epg_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("operation", OPERATION_CHANNEL_CHANGE.to_string()),
        ("epg_id", pad_epg_id(epg_id)),
        ("uui", "1".to_string()),
    ]
}

/// `result.data` of an information response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    /// `"0"` while the receiver is on.
    pub active_standby_state: String,
    /// `"PLAY"` or `"PAUSE"` when a media-state is reported.
    #[serde(default)]
    pub played_media_state: Option<String>,
    /// External id of the tuned channel, absent on home screen/apps.
    #[serde(default)]
    pub played_media_id: Option<String>,
    #[serde(default)]
    pub osd_context: Option<String>,
    #[serde(default)]
    pub wol_support: Option<String>,
}

impl StatusPayload {
    pub fn is_on(&self) -> bool {
        self.active_standby_state == "0"
    }

    pub fn wol_supported(&self) -> bool {
        self.wol_support.as_deref() == Some("0")
    }
}

/// Extract the typed `result.data` object from a status response.
pub fn parse_status_response(body: &Value) -> Option<StatusPayload> {
    let data = body.pointer("/result/data")?;
    serde_json::from_value(data.clone()).ok()
}

/// Commands answer with `result.responseCode`, `"0"` meaning success.
pub fn command_succeeded(body: &Value) -> bool {
    body.pointer("/result/responseCode").and_then(|v| v.as_str()) == Some("0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn epg_id_star_padding() {
        assert_eq!(pad_epg_id("4"), "*********4");
        assert_eq!(pad_epg_id("1939"), "******1939");
        assert_eq!(pad_epg_id("4294967295"), "4294967295");
    }

    #[test]
    fn key_names_roundtrip() {
        for key in Key::ALL {
            assert_eq!(Key::from_name(key.name()), Some(*key));
        }
        assert_eq!(Key::from_name("WARP"), None);
    }

    #[test]
    fn key_codes() {
        assert_eq!(Key::Power.code(), 116);
        assert_eq!(Key::Digit0.code(), 512);
        assert_eq!(Key::Digit9.code(), 521);
        assert_eq!(Key::PlayPause.code(), 164);
        assert_eq!(Key::Vod.code(), 393);
    }

    #[test]
    fn keypress_query_shape() {
        let q = keypress_query(Key::VolumeUp, KeyPressMode::Tap);
        assert_eq!(
            q,
            vec![
                ("operation", "01".to_string()),
                ("key", "115".to_string()),
                ("mode", "0".to_string()),
            ]
        );
    }

    #[test]
    fn channel_change_query_shape() {
        let q = channel_change_query("4");
        assert_eq!(
            q,
            vec![
                ("operation", "09".to_string()),
                ("epg_id", "*********4".to_string()),
                ("uui", "1".to_string()),
            ]
        );
    }

    #[test]
    fn parse_status_with_media() {
        let body = json!({
            "result": {
                "responseCode": "0",
                "data": {
                    "activeStandbyState": "0",
                    "playedMediaState": "PLAY",
                    "playedMediaId": "4",
                    "osdContext": "LIVE",
                    "wolSupport": "0"
                }
            }
        });
        let status = parse_status_response(&body).unwrap();
        assert!(status.is_on());
        assert!(status.wol_supported());
        assert_eq!(status.played_media_state.as_deref(), Some("PLAY"));
        assert_eq!(status.played_media_id.as_deref(), Some("4"));
        assert_eq!(status.osd_context.as_deref(), Some("LIVE"));
    }

    #[test]
    fn parse_status_standby_without_media() {
        let body = json!({
            "result": {
                "data": { "activeStandbyState": "1", "osdContext": "MAIN_PROCESS" }
            }
        });
        let status = parse_status_response(&body).unwrap();
        assert!(!status.is_on());
        assert!(status.played_media_id.is_none());
        assert!(status.played_media_state.is_none());
    }

    #[test]
    fn parse_status_missing_data() {
        assert!(parse_status_response(&json!({"result": {}})).is_none());
        assert!(parse_status_response(&json!({})).is_none());
        // contract violation: required key absent
        assert!(parse_status_response(&json!({"result": {"data": {}}})).is_none());
    }

    #[test]
    fn response_code_parsing() {
        assert!(command_succeeded(&json!({"result": {"responseCode": "0"}})));
        assert!(!command_succeeded(&json!({"result": {"responseCode": "-10"}})));
        assert!(!command_succeeded(&json!({"result": {}})));
        assert!(!command_succeeded(&json!({})));
    }
}
