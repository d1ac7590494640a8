use crate::types::{DeviceSnapshot, MediaKind, PowerState};

/// Changed-fields view of one reconciliation, emitted to subscribers.
///
/// Outer `None` means unchanged; for string fields the inner `None`
/// means the value was cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDelta {
    pub power: Option<PowerState>,
    pub title: Option<Option<String>>,
    pub episode_label: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
    pub media_kind: Option<MediaKind>,
    pub position: Option<i64>,
    pub duration: Option<i64>,
    /// Channel display name.
    pub source: Option<Option<String>>,
}

impl SnapshotDelta {
    pub fn is_empty(&self) -> bool {
        *self == SnapshotDelta::default()
    }
}

/// Field-by-field comparison of two snapshots.
///
/// A transition into [`PowerState::Off`] additionally force-clears every
/// program field that carried a value, whatever the individual field
/// diffs say: consumers always see a blank player after power-off.
pub(crate) fn delta(prev: &DeviceSnapshot, next: &DeviceSnapshot) -> SnapshotDelta {
    let mut d = SnapshotDelta::default();

    if prev.power != next.power {
        d.power = Some(next.power);
    }
    let next_title = next.program_title();
    if prev.program_title() != next_title {
        d.title = Some(next_title);
        d.media_kind = Some(next.media_kind);
    }
    let next_label = next.episode_label();
    if prev.episode_label() != next_label {
        d.episode_label = Some(next_label);
    }
    if prev.image_url != next.image_url {
        d.image_url = Some(next.image_url.clone());
        d.media_kind = Some(next.media_kind);
    }
    if prev.position != next.position {
        d.position = Some(next.position);
    }
    if prev.duration != next.duration {
        d.duration = Some(next.duration);
    }
    if prev.channel_name != next.channel_name {
        d.source = Some(next.channel_name.clone());
    }

    if next.power == PowerState::Off && prev.power != PowerState::Off {
        if prev.program_title().is_some() {
            d.title = Some(None);
        }
        if prev.episode_label().is_some() {
            d.episode_label = Some(None);
        }
        if prev.image_url.is_some() {
            d.image_url = Some(None);
        }
        if prev.media_kind != MediaKind::Show {
            d.media_kind = Some(MediaKind::Show);
        }
        if prev.position != 0 {
            d.position = Some(0);
        }
        if prev.duration != 0 {
            d.duration = Some(0);
        }
        if prev.channel_name.is_some() {
            d.source = Some(None);
        }
    }

    d
}
