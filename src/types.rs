use crate::diff::SnapshotDelta;

/// Channel-id sentinel reported while no channel is tuned (home screen,
/// Netflix, VOD...).
pub const NO_CHANNEL: &str = "-1";

/// Power/playback state of the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Unknown,
    Off,
    On,
    Playing,
    Paused,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On | PowerState::Playing | PowerState::Paused)
    }
}

/// Kind of the currently played program, mirroring the guide's
/// episodic/standalone split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaKind {
    /// Episodic content (has a series container in the guide).
    Video,
    /// Standalone program.
    #[default]
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Country {
    France,
    Poland,
}

impl Country {
    pub fn as_str(&self) -> &'static str {
        match self {
            Country::France => "france",
            Country::Poland => "poland",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "france" => Some(Country::France),
            "poland" => Some(Country::Poland),
            _ => None,
        }
    }
}

/// Reconciled receiver state at one point in time.
///
/// Immutable value: the reconciler builds a fresh snapshot each tick and
/// swaps it in atomically, so "previous" and "current" never alias.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceSnapshot {
    pub power: PowerState,
    /// External channel id as reported by the receiver, [`NO_CHANNEL`]
    /// while off-air.
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    /// Program's own title.
    pub title: Option<String>,
    /// Parent series title, when the guide provides one.
    pub series_title: Option<String>,
    /// Season number, 0 when unknown.
    pub season: u32,
    /// Episode number, 0 when unknown.
    pub episode: u32,
    pub definition: Option<String>,
    pub image_url: Option<String>,
    pub media_kind: MediaKind,
    /// Program start, epoch seconds; 0 means unknown.
    pub start_time: i64,
    /// Program duration in seconds.
    pub duration: i64,
    /// Seconds into the program; only meaningful while `duration > 0`.
    pub position: i64,
}

impl DeviceSnapshot {
    /// Display title: program title joined with the series title.
    pub fn program_title(&self) -> Option<String> {
        let parts: Vec<&str> = [self.title.as_deref(), self.series_title.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" - "))
        }
    }

    /// Channel + season/episode label, e.g. `FRANCE 2 - S2E5`.
    ///
    /// The E-part is omitted when the episode is 0, the S-part when the
    /// season is 0; a bare `E<n>` is used when only the episode is known.
    pub fn episode_label(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(name) = &self.channel_name {
            parts.push(name.clone());
        }
        if self.season != 0 {
            if self.episode != 0 {
                parts.push(format!("S{}E{}", self.season, self.episode));
            } else {
                parts.push(format!("S{}", self.season));
            }
        } else if self.episode != 0 {
            parts.push(format!("E{}", self.episode));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" - "))
        }
    }
}

/// Events delivered to subscribers registered on the builder.
#[derive(Debug, Clone)]
pub enum Event {
    Connected { device_id: String },
    Disconnected { device_id: String },
    /// Emitted after a reconciliation that changed at least one field.
    Updated { device_id: String, delta: SnapshotDelta },
}
