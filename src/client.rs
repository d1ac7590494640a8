use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channels::ChannelDirectory;
use crate::diff::{self, SnapshotDelta};
use crate::epg::{self, GuideCache, GuideEntry, GuideSource, MatchMode, ProgramKind};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{self, CONTROL_PATH, DEFAULT_PORT, Key, KeyPressMode, StatusPayload};
use crate::types::*;
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Consecutive off ticks after which the poll loop stops itself.
const OFF_TICKS_BEFORE_STOP: u32 = 10;
/// Delay before the out-of-band refresh following a content-changing command.
const COMMAND_REFRESH_DELAY: Duration = Duration::from_secs(2);
/// Wake-up time between the power press and the confirming OK press.
const POWER_WAKE_DELAY: Duration = Duration::from_secs(2);

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Receiver commands. The set is closed; dispatch is a single exhaustive
/// `match`, so adding a variant without a handler does not compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
    Toggle,
    VolumeUp,
    VolumeDown,
    MuteToggle,
    ChannelUp,
    ChannelDown,
    PlayPause,
    Play,
    Pause,
    Key(Key),
    /// Key looked up by its table name; unknown names are rejected
    /// before any network call.
    KeyByName(String),
    SelectChannelId(String),
    SelectChannelName(String),
}

/// Outcome reported to the entity layer. Connectivity failures and
/// receiver-side rejections both map to `Failed`; errors are reserved
/// for local precondition violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Failed,
}

pub struct LiveboxClientBuilder {
    hostname: String,
    port: u16,
    country: Country,
    device_id: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
    guide_endpoint: Option<String>,
    event_callbacks: Vec<EventCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl LiveboxClientBuilder {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            country: Country::France,
            device_id: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            guide_endpoint: None,
            event_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn country(mut self, country: Country) -> Self {
        self.country = country;
        self
    }

    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the program-guide endpoint (tests point this at a mock).
    pub fn guide_endpoint(mut self, url: impl Into<String>) -> Self {
        self.guide_endpoint = Some(url.into());
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> LiveboxClient {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(
                MessageLogger::new(mode, &path).expect("failed to open log file"),
            )),
            _ => None,
        };

        let guide = epg::source_for(self.country);
        let guide_url = self
            .guide_endpoint
            .unwrap_or_else(|| guide.endpoint().to_string());

        LiveboxClient {
            inner: Arc::new(Inner {
                device_id: self.device_id.unwrap_or_else(|| self.hostname.clone()),
                control_url: format!("http://{}:{}{}", self.hostname, self.port, CONTROL_PATH),
                guide_url,
                timeout: self.timeout,
                poll_interval: self.poll_interval,
                guide,
                directory: ChannelDirectory::for_country(self.country),
                session: Mutex::new(None),
                reconcile_gate: tokio::sync::Mutex::new(()),
                state: Mutex::new(ReconcilerState::default()),
                conn_err_logged: AtomicBool::new(false),
                callbacks: self.event_callbacks,
                poll_task: Mutex::new(None),
                logger,
            }),
        }
    }
}

#[derive(Default)]
struct ReconcilerState {
    snapshot: DeviceSnapshot,
    /// Channel of the last full guide resync; a mismatch marks a
    /// program boundary.
    last_channel_id: Option<String>,
    cache: GuideCache,
}

struct Inner {
    device_id: String,
    control_url: String,
    guide_url: String,
    timeout: Duration,
    poll_interval: Duration,
    guide: Box<dyn GuideSource>,
    directory: ChannelDirectory,
    session: Mutex<Option<reqwest::Client>>,
    reconcile_gate: tokio::sync::Mutex<()>,
    state: Mutex<ReconcilerState>,
    conn_err_logged: AtomicBool,
    callbacks: Vec<EventCallback>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    logger: Option<Mutex<MessageLogger>>,
}

/// Client for one Orange TV receiver: owns the network session, the
/// reconciled snapshot and the background polling task. Cheap to clone;
/// clones share the same device.
#[derive(Clone)]
pub struct LiveboxClient {
    inner: Arc<Inner>,
}

impl LiveboxClient {
    pub fn builder(hostname: impl Into<String>) -> LiveboxClientBuilder {
        LiveboxClientBuilder::new(hostname)
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Last reconciled state.
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.inner.state.lock().unwrap().snapshot.clone()
    }

    pub fn is_on(&self) -> bool {
        self.snapshot().power.is_on()
    }

    pub fn directory(&self) -> &ChannelDirectory {
        &self.inner.directory
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.inner.directory.display_names().collect()
    }

    /// Open a fresh network session, replacing any prior handle.
    /// In-flight calls on a replaced handle fail cleanly without
    /// touching the new one. Polling is started separately, either by
    /// [`start_polling`](Self::start_polling) or by the next command.
    pub fn connect(&self) -> Result<()> {
        let http = reqwest::Client::builder()
            .user_agent(self.inner.guide.user_agent())
            .connect_timeout(self.inner.timeout)
            .timeout(self.inner.timeout)
            .build()?;
        *self.inner.session.lock().unwrap() = Some(http);
        debug!(device = %self.inner.device_id, url = %self.inner.control_url, "connected");
        self.emit(&Event::Connected {
            device_id: self.inner.device_id.clone(),
        });
        Ok(())
    }

    pub fn disconnect(&self) {
        *self.inner.session.lock().unwrap() = None;
        self.stop_polling();
        debug!(device = %self.inner.device_id, "disconnected");
        self.emit(&Event::Disconnected {
            device_id: self.inner.device_id.clone(),
        });
    }

    // -- Poll scheduler --

    /// Start the background poll loop. Idempotent: a live loop is left
    /// alone, a self-terminated one is replaced.
    pub fn start_polling(&self) {
        let mut guard = self.inner.poll_task.lock().unwrap();
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            return;
        }
        debug!(device = %self.inner.device_id, "starting poll task");
        let client = self.clone();
        *guard = Some(tokio::spawn(async move {
            let mut off_ticks = 0u32;
            loop {
                if !client.is_on() {
                    off_ticks += 1;
                    if off_ticks > OFF_TICKS_BEFORE_STOP {
                        debug!(device = %client.inner.device_id, "device stayed off, stopping poll task");
                        break;
                    }
                    debug!(device = %client.inner.device_id, tick = off_ticks, "device is off");
                } else if off_ticks > 0 {
                    off_ticks = 0;
                    debug!(device = %client.inner.device_id, "device is on again");
                }
                if let Err(e) = client.update().await {
                    warn!(device = %client.inner.device_id, "reconciliation failed: {e}");
                }
                tokio::time::sleep(client.inner.poll_interval).await;
            }
        }));
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.inner.poll_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poll_task
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // -- Reconciliation --

    /// Reconcile device status and guide data into a fresh snapshot and
    /// emit the delta. At most one reconciliation runs at a time; a call
    /// that finds one in flight returns without effect.
    pub async fn update(&self) -> Result<()> {
        self.update_at(Utc::now().timestamp()).await
    }

    /// [`update`](Self::update) with an explicit clock.
    pub async fn update_at(&self, now: i64) -> Result<()> {
        let Ok(_gate) = self.inner.reconcile_gate.try_lock() else {
            trace!(device = %self.inner.device_id, "reconciliation in flight, skipping");
            return Ok(());
        };
        if self.inner.session.lock().unwrap().is_none() {
            self.connect()?;
        }

        let (prev, last_channel) = {
            let st = self.inner.state.lock().unwrap();
            (st.snapshot.clone(), st.last_channel_id.clone())
        };

        let mut next = prev.clone();
        let mut new_last_channel = last_channel.clone();
        let mut cache_update: Option<(String, Vec<GuideEntry>)> = None;

        match self.fetch_device_status().await {
            // Unreachable is indistinguishable from powered off.
            None => next.power = PowerState::Off,
            Some(status) => {
                next.power = derive_power(&status);

                let resolved = status.played_media_id.as_deref().and_then(|id| {
                    self.inner
                        .directory
                        .find_by_external_id(id)
                        .map(|rec| (id.to_string(), rec))
                });
                match resolved {
                    Some((channel_id, record)) => {
                        next.channel_id = Some(channel_id.clone());
                        let boundary = last_channel.as_deref() != Some(channel_id.as_str())
                            || prev.position > prev.duration;
                        if boundary {
                            new_last_channel = Some(channel_id.clone());
                            next.channel_name = Some(record.name.to_string());
                            clear_program(&mut next);
                            // Guide lookups need a nonzero numeric id.
                            if channel_id.parse::<i64>().unwrap_or(0) != 0 {
                                if let Some(entries) =
                                    self.guide_entries(&channel_id, now, &mut cache_update).await
                                    && let Some(entry) =
                                        epg::current_entry(&entries, now, MatchMode::Nearest)
                                {
                                    apply_entry(&mut next, entry);
                                }
                            }
                        }
                    }
                    // Home screen, apps, or an id the table does not know.
                    None => {
                        next.channel_id = Some(NO_CHANNEL.to_string());
                        new_last_channel = Some(NO_CHANNEL.to_string());
                        next.channel_name =
                            status.osd_context.as_deref().map(|c| c.to_uppercase());
                        next.media_kind = MediaKind::Show;
                        clear_program(&mut next);
                    }
                }

                if next.start_time > 0 {
                    next.position = now - next.start_time;
                }
            }
        }

        if next.power == PowerState::Off && prev.power != PowerState::Off {
            // Drop the stale program picture so the next power-on
            // resolves the guide from scratch.
            clear_program(&mut next);
            next.channel_id = None;
            next.channel_name = None;
            next.media_kind = MediaKind::Show;
            new_last_channel = None;
        }

        let delta = diff::delta(&prev, &next);
        {
            let mut st = self.inner.state.lock().unwrap();
            st.snapshot = next;
            st.last_channel_id = new_last_channel;
            if let Some((channel_id, entries)) = cache_update {
                st.cache.store(&channel_id, entries);
            }
        }
        if !delta.is_empty() {
            self.emit_delta(delta);
        }
        Ok(())
    }

    /// Cached guide entries while the cached program still airs, a
    /// fresh fetch otherwise. A fetch failure yields `None` and leaves
    /// the snapshot partial; that is a valid, diffable state.
    async fn guide_entries(
        &self,
        channel_id: &str,
        now: i64,
        cache_update: &mut Option<(String, Vec<GuideEntry>)>,
    ) -> Option<Vec<GuideEntry>> {
        let cached = {
            let st = self.inner.state.lock().unwrap();
            st.cache.fresh(channel_id, now).map(<[GuideEntry]>::to_vec)
        };
        if cached.is_some() {
            return cached;
        }
        let fetched = self.fetch_guide(channel_id).await?;
        *cache_update = Some((channel_id.to_string(), fetched.clone()));
        Some(fetched)
    }

    // -- Upstream gateways --

    async fn fetch_device_status(&self) -> Option<StatusPayload> {
        let session = self.session().ok()?;
        let params = protocol::status_query();
        if let Some(logger) = &self.inner.logger {
            logger.lock().unwrap().log_request("control", &params);
        }
        let result = async {
            Ok::<_, reqwest::Error>(
                session
                    .get(&self.inner.control_url)
                    .query(&params)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Value>()
                    .await?,
            )
        }
        .await;

        match result {
            Ok(body) => {
                if let Some(logger) = &self.inner.logger {
                    logger.lock().unwrap().log_status(&body);
                }
                self.inner.conn_err_logged.store(false, Ordering::Relaxed);
                match protocol::parse_status_response(&body) {
                    Some(status) => Some(status),
                    None => {
                        warn!(device = %self.inner.device_id, "malformed status response");
                        None
                    }
                }
            }
            Err(e) => {
                // One log line per unbroken failure streak.
                if !self.inner.conn_err_logged.swap(true, Ordering::Relaxed) {
                    warn!(device = %self.inner.device_id, "device status request failed: {e}");
                } else {
                    trace!(device = %self.inner.device_id, "device still unreachable: {e}");
                }
                None
            }
        }
    }

    async fn fetch_guide(&self, channel_id: &str) -> Option<Vec<GuideEntry>> {
        let session = self.session().ok()?;
        let params = self.inner.guide.query(channel_id);
        if let Some(logger) = &self.inner.logger {
            logger.lock().unwrap().log_request("guide", &params);
        }
        debug!(channel = channel_id, "requesting guide data");
        let result = async {
            Ok::<_, reqwest::Error>(
                session
                    .get(&self.inner.guide_url)
                    .query(&params)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Value>()
                    .await?,
            )
        }
        .await;

        match result {
            Ok(body) => Some(self.inner.guide.extract(&body, channel_id)),
            Err(e) => {
                warn!(channel = channel_id, "guide request failed: {e}");
                None
            }
        }
    }

    // -- Commands --

    /// Dispatch one command and restart polling (a user interacting with
    /// the receiver is the cue to resume a self-terminated poll loop).
    pub async fn command(&self, cmd: Command) -> Result<CommandStatus> {
        debug!(device = %self.inner.device_id, ?cmd, "dispatching command");
        let status = self.dispatch(&cmd).await?;
        self.start_polling();
        Ok(status)
    }

    async fn dispatch(&self, cmd: &Command) -> Result<CommandStatus> {
        match cmd {
            Command::TurnOn => self.turn_on().await,
            Command::TurnOff => self.turn_off().await,
            Command::Toggle => self.press_key(Key::Power, "toggle").await,
            Command::VolumeUp => self.press_key(Key::VolumeUp, "volume_up").await,
            Command::VolumeDown => self.press_key(Key::VolumeDown, "volume_down").await,
            Command::MuteToggle => self.press_key(Key::Mute, "mute").await,
            Command::ChannelUp => {
                let status = self.press_key(Key::ChannelUp, "channel_up").await?;
                self.schedule_refresh(Duration::ZERO);
                Ok(status)
            }
            Command::ChannelDown => {
                let status = self.press_key(Key::ChannelDown, "channel_down").await?;
                self.schedule_refresh(Duration::ZERO);
                Ok(status)
            }
            Command::PlayPause => self.press_key(Key::PlayPause, "play_pause").await,
            Command::Play => {
                if self.snapshot().power == PowerState::Paused {
                    self.press_key(Key::PlayPause, "play").await
                } else {
                    debug!("media is already playing");
                    Ok(CommandStatus::Ok)
                }
            }
            Command::Pause => {
                if self.snapshot().power == PowerState::Playing {
                    self.press_key(Key::PlayPause, "pause").await
                } else {
                    debug!("media is already paused");
                    Ok(CommandStatus::Ok)
                }
            }
            Command::Key(key) => self.press_key(*key, "press_key").await,
            Command::KeyByName(name) => {
                let key =
                    Key::from_name(name).ok_or_else(|| Error::UnknownKey(name.clone()))?;
                self.press_key(key, "press_key").await
            }
            Command::SelectChannelId(id) => self.change_channel(id).await,
            Command::SelectChannelName(name) => {
                let record = self.inner.directory.find_by_display_text(name);
                self.change_channel(record.external_id).await
            }
        }
    }

    async fn turn_on(&self) -> Result<CommandStatus> {
        if self.is_on() {
            return Ok(CommandStatus::Ok);
        }
        let status = self.press_key(Key::Power, "turn_on").await?;
        if status == CommandStatus::Failed {
            return Ok(status);
        }
        // The receiver boots to a resume prompt; OK dismisses it.
        tokio::time::sleep(POWER_WAKE_DELAY).await;
        let status = self.press_key(Key::Ok, "turn_on").await?;
        self.schedule_refresh(COMMAND_REFRESH_DELAY);
        Ok(status)
    }

    async fn turn_off(&self) -> Result<CommandStatus> {
        if self.is_on() {
            self.press_key(Key::Power, "turn_off").await
        } else {
            Ok(CommandStatus::Ok)
        }
    }

    async fn press_key(&self, key: Key, action: &str) -> Result<CommandStatus> {
        let params = protocol::keypress_query(key, KeyPressMode::Tap);
        if let Some(logger) = &self.inner.logger {
            logger.lock().unwrap().log_command(action, Some(key.name()), &params);
        }
        debug!(key = key.name(), "pressing key");
        match self.control_request(params).await? {
            Some(body) if protocol::command_succeeded(&body) => Ok(CommandStatus::Ok),
            _ => Ok(CommandStatus::Failed),
        }
    }

    async fn change_channel(&self, epg_id: &str) -> Result<CommandStatus> {
        let params = protocol::channel_change_query(epg_id);
        if let Some(logger) = &self.inner.logger {
            logger.lock().unwrap().log_command("change_channel", None, &params);
        }
        let name = self
            .inner
            .directory
            .find_by_external_id(epg_id)
            .map(|c| c.name)
            .unwrap_or("?");
        debug!(channel = name, epg_id, "tuning channel");
        let status = match self.control_request(params).await? {
            Some(body) if protocol::command_succeeded(&body) => CommandStatus::Ok,
            _ => CommandStatus::Failed,
        };
        self.schedule_refresh(COMMAND_REFRESH_DELAY);
        Ok(status)
    }

    async fn control_request(&self, params: Vec<(&'static str, String)>) -> Result<Option<Value>> {
        let session = self.session()?;
        let result = async {
            Ok::<_, reqwest::Error>(
                session
                    .get(&self.inner.control_url)
                    .query(&params)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Value>()
                    .await?,
            )
        }
        .await;
        match result {
            Ok(body) => Ok(Some(body)),
            Err(e) => {
                debug!(device = %self.inner.device_id, "control request failed: {e}");
                Ok(None)
            }
        }
    }

    // -- Helpers --

    fn session(&self) -> Result<reqwest::Client> {
        self.inner
            .session
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NotConnected)
    }

    fn schedule_refresh(&self, delay: Duration) {
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = client.update().await {
                debug!("refresh after command failed: {e}");
            }
        });
    }

    fn emit(&self, event: &Event) {
        for cb in &self.inner.callbacks {
            cb(event);
        }
    }

    fn emit_delta(&self, delta: SnapshotDelta) {
        self.emit(&Event::Updated {
            device_id: self.inner.device_id.clone(),
            delta,
        });
    }
}

fn derive_power(status: &StatusPayload) -> PowerState {
    match status.played_media_state.as_deref() {
        Some("PLAY") => PowerState::Playing,
        Some("PAUSE") => PowerState::Paused,
        _ => {
            if status.is_on() {
                PowerState::On
            } else {
                PowerState::Off
            }
        }
    }
}

fn clear_program(snapshot: &mut DeviceSnapshot) {
    snapshot.title = None;
    snapshot.series_title = None;
    snapshot.season = 0;
    snapshot.episode = 0;
    snapshot.definition = None;
    snapshot.image_url = None;
    snapshot.start_time = 0;
    snapshot.duration = 0;
    snapshot.position = 0;
}

fn apply_entry(snapshot: &mut DeviceSnapshot, entry: &GuideEntry) {
    match entry.kind {
        ProgramKind::Episode => {
            snapshot.media_kind = MediaKind::Video;
            snapshot.title = entry.title.clone();
            snapshot.series_title = entry.series_title.clone();
            snapshot.season = entry.season;
            snapshot.episode = entry.episode;
        }
        ProgramKind::Standalone => {
            snapshot.media_kind = MediaKind::Show;
            snapshot.title = entry.title.clone();
        }
    }
    snapshot.definition = entry.definition.clone();
    snapshot.start_time = entry.start_time;
    snapshot.duration = entry.duration;
    snapshot.image_url = entry.image_url.clone();
}
