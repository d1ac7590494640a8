use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::types::Country;

// The guide endpoints only answer to the STB user agent.
const EPG_USER_AGENT: &str =
    "Opera/9.80 (Linux i686; U; fr) Presto/2.10.287 Version/12.00 ; SC/IHD92 STB";

const FRANCE_EPG_URL: &str =
    "https://rp-ott-mediation-tv.woopic.com/api-gw/live/v3/applications/STB4PC/programs";
const POLAND_EPG_URL: &str = "https://tvgo.orange.pl/gpapi/epg/epg";
const POLAND_IMAGE_BASE: &str = "https://tvgo.orange.pl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Has a series container in the guide.
    Episode,
    Standalone,
}

/// One normalized program-guide record. Entries for a channel are kept in
/// the upstream (chronological) order.
#[derive(Debug, Clone, PartialEq)]
pub struct GuideEntry {
    pub kind: ProgramKind,
    pub title: Option<String>,
    pub series_title: Option<String>,
    /// 0 when unknown.
    pub season: u32,
    /// 0 when unknown.
    pub episode: u32,
    pub definition: Option<String>,
    /// Epoch seconds.
    pub start_time: i64,
    /// Seconds.
    pub duration: i64,
    pub image_url: Option<String>,
}

impl GuideEntry {
    /// Whether `[start_time, start_time + duration)` contains `now`.
    pub fn airs_at(&self, now: i64) -> bool {
        self.start_time <= now && now < self.start_time + self.duration
    }
}

/// Country-specific guide access: request shaping and entry extraction.
/// The reconciler only sees this interface and normalized entries.
pub trait GuideSource: Send + Sync {
    fn endpoint(&self) -> &'static str;
    fn user_agent(&self) -> &'static str {
        EPG_USER_AGENT
    }
    fn query(&self, channel_id: &str) -> Vec<(&'static str, String)>;
    fn extract(&self, payload: &Value, channel_id: &str) -> Vec<GuideEntry>;
}

pub(crate) fn source_for(country: Country) -> Box<dyn GuideSource> {
    match country {
        Country::France => Box::new(FranceGuide),
        Country::Poland => Box::new(PolandGuide),
    }
}

/// woopic.com `programs` endpoint: payload keyed by channel id, entries
/// carry `programType`, `diffusionDate`, `season.serie` containers and a
/// `covers` list.
pub struct FranceGuide;

impl GuideSource for FranceGuide {
    fn endpoint(&self) -> &'static str {
        FRANCE_EPG_URL
    }

    fn query(&self, channel_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("groupBy", "channel".to_string()),
            ("period", "current".to_string()),
            ("epgIds", channel_id.to_string()),
            ("mco", "OFR".to_string()),
        ]
    }

    fn extract(&self, payload: &Value, channel_id: &str) -> Vec<GuideEntry> {
        let Some(Value::Array(programs)) = payload.get(channel_id) else {
            return Vec::new();
        };
        programs
            .iter()
            .filter_map(|entry| {
                let (Some(start), Some(duration)) = (
                    entry.get("diffusionDate").and_then(Value::as_i64),
                    entry.get("duration").and_then(Value::as_i64),
                ) else {
                    warn!(channel = channel_id, "guide entry without time window, skipping");
                    return None;
                };

                let episodic =
                    entry.get("programType").and_then(Value::as_str) == Some("EPISODE");
                let title = entry
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                let (kind, series_title, season, episode) = if episodic {
                    (
                        ProgramKind::Episode,
                        entry
                            .pointer("/season/serie/title")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        entry
                            .pointer("/season/number")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                        entry
                            .get("episodeNumber")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32,
                    )
                } else {
                    (ProgramKind::Standalone, None, 0, 0)
                };

                // Prefer the secondary (higher-resolution) cover.
                let covers = entry.get("covers").and_then(Value::as_array);
                let image_url = covers
                    .and_then(|c| c.get(1).or_else(|| c.first()))
                    .and_then(|c| c.get("url"))
                    .and_then(Value::as_str)
                    .map(str::to_string);

                Some(GuideEntry {
                    kind,
                    title,
                    series_title,
                    season,
                    episode,
                    definition: entry
                        .get("definition")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    start_time: start,
                    duration,
                    image_url,
                })
            })
            .collect()
    }
}

/// tvgo.orange.pl endpoint: one `epg` list for all channels, matched by
/// `channelExternalId` containment, schedules with `startDate`/`endDate`.
pub struct PolandGuide;

impl GuideSource for PolandGuide {
    fn endpoint(&self) -> &'static str {
        POLAND_EPG_URL
    }

    fn query(&self, _channel_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("hhTech", String::new()),
            ("deviceCat", "otg".to_string()),
        ]
    }

    fn extract(&self, payload: &Value, channel_id: &str) -> Vec<GuideEntry> {
        let Some(Value::Array(blocks)) = payload.get("epg") else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        for block in blocks {
            let matches = block
                .get("channelExternalId")
                .and_then(Value::as_str)
                .is_some_and(|ext| ext.contains(channel_id));
            if !matches {
                continue;
            }
            let Some(Value::Array(schedules)) = block.get("schedule") else {
                continue;
            };
            for sch in schedules {
                let (Some(start), Some(end)) = (
                    sch.get("startDate").and_then(Value::as_i64),
                    sch.get("endDate").and_then(Value::as_i64),
                ) else {
                    warn!(channel = channel_id, "schedule without time window, skipping");
                    continue;
                };
                let series = sch.get("isSeries").and_then(Value::as_bool).unwrap_or(false);
                entries.push(GuideEntry {
                    kind: if series {
                        ProgramKind::Episode
                    } else {
                        ProgramKind::Standalone
                    },
                    title: sch.get("name").and_then(Value::as_str).map(str::to_string),
                    series_title: None,
                    season: 0,
                    episode: if series {
                        sch.get("episodeNumber")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32
                    } else {
                        0
                    },
                    definition: None,
                    start_time: start,
                    duration: end - start,
                    image_url: sch
                        .get("imagePath")
                        .and_then(Value::as_str)
                        .map(|p| format!("{POLAND_IMAGE_BASE}{p}")),
                });
            }
        }
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchMode {
    /// Only a window containing `now` counts.
    Exact,
    /// Fall back to the first entry when no window matches.
    Nearest,
}

pub(crate) fn current_entry<'a>(
    entries: &'a [GuideEntry],
    now: i64,
    mode: MatchMode,
) -> Option<&'a GuideEntry> {
    entries
        .iter()
        .find(|e| e.airs_at(now))
        .or_else(|| match mode {
            MatchMode::Exact => None,
            MatchMode::Nearest => entries.first(),
        })
}

/// Per-channel cache of the last fetched guide entries.
///
/// An entry is fresh while it is non-empty and still contains a program
/// airing now; there is no timer-based expiry. A successful fetch always
/// replaces the cached entry, a failed fetch caches nothing.
#[derive(Debug, Default)]
pub(crate) struct GuideCache {
    entries: HashMap<String, Vec<GuideEntry>>,
}

impl GuideCache {
    pub(crate) fn fresh(&self, channel_id: &str, now: i64) -> Option<&[GuideEntry]> {
        let cached = self.entries.get(channel_id)?;
        if cached.is_empty() {
            return None;
        }
        current_entry(cached, now, MatchMode::Exact)?;
        Some(cached)
    }

    pub(crate) fn store(&mut self, channel_id: &str, entries: Vec<GuideEntry>) {
        self.entries.insert(channel_id.to_string(), entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(start: i64, duration: i64) -> GuideEntry {
        GuideEntry {
            kind: ProgramKind::Standalone,
            title: Some("t".into()),
            series_title: None,
            season: 0,
            episode: 0,
            definition: None,
            start_time: start,
            duration,
            image_url: None,
        }
    }

    #[test]
    fn france_extracts_episodic_entry() {
        let payload = json!({
            "4": [{
                "programType": "EPISODE",
                "title": "Show A",
                "season": { "number": 2, "serie": { "title": "The Series" } },
                "episodeNumber": 5,
                "definition": "HD",
                "diffusionDate": 1000,
                "duration": 1800,
                "covers": [
                    { "url": "http://img/low.jpg" },
                    { "url": "http://img/high.jpg" }
                ]
            }]
        });
        let entries = FranceGuide.extract(&payload, "4");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.kind, ProgramKind::Episode);
        assert_eq!(e.title.as_deref(), Some("Show A"));
        assert_eq!(e.series_title.as_deref(), Some("The Series"));
        assert_eq!(e.season, 2);
        assert_eq!(e.episode, 5);
        assert_eq!(e.definition.as_deref(), Some("HD"));
        assert_eq!(e.start_time, 1000);
        assert_eq!(e.duration, 1800);
        assert_eq!(e.image_url.as_deref(), Some("http://img/high.jpg"));
    }

    #[test]
    fn france_extracts_standalone_entry() {
        let payload = json!({
            "118": [{
                "programType": "OTHER",
                "title": "Evening News",
                "definition": "SD",
                "diffusionDate": 2000,
                "duration": 600,
                "covers": [{ "url": "http://img/only.jpg" }]
            }]
        });
        let entries = FranceGuide.extract(&payload, "118");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.kind, ProgramKind::Standalone);
        assert_eq!(e.title.as_deref(), Some("Evening News"));
        assert_eq!(e.series_title, None);
        assert_eq!(e.season, 0);
        assert_eq!(e.episode, 0);
        assert_eq!(e.image_url.as_deref(), Some("http://img/only.jpg"));
    }

    #[test]
    fn france_defaults_missing_episode_to_zero() {
        let payload = json!({
            "4": [{
                "programType": "EPISODE",
                "title": "Show A",
                "season": { "number": 1 },
                "diffusionDate": 1000,
                "duration": 1800
            }]
        });
        let entries = FranceGuide.extract(&payload, "4");
        assert_eq!(entries[0].episode, 0);
        assert_eq!(entries[0].series_title, None);
        assert_eq!(entries[0].image_url, None);
    }

    #[test]
    fn france_skips_entries_without_window() {
        let payload = json!({
            "4": [
                { "programType": "OTHER", "title": "broken" },
                { "programType": "OTHER", "title": "good", "diffusionDate": 1, "duration": 2 }
            ]
        });
        let entries = FranceGuide.extract(&payload, "4");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("good"));
    }

    #[test]
    fn france_unknown_channel_yields_nothing() {
        assert!(FranceGuide.extract(&json!({"4": []}), "118").is_empty());
        assert!(FranceGuide.extract(&json!({}), "4").is_empty());
    }

    #[test]
    fn poland_extracts_matching_channel() {
        let payload = json!({
            "epg": [
                {
                    "channelExternalId": "ext-14171-hd",
                    "schedule": [
                        {
                            "startDate": 100, "endDate": 400,
                            "isSeries": true, "name": "Serial", "episodeNumber": 3,
                            "imagePath": "/mnapi/epgimages/x.jpg"
                        },
                        { "startDate": 400, "endDate": 700, "name": "Film" }
                    ]
                },
                { "channelExternalId": "other", "schedule": [{ "startDate": 0, "endDate": 1 }] }
            ]
        });
        let entries = PolandGuide.extract(&payload, "14171");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, ProgramKind::Episode);
        assert_eq!(entries[0].title.as_deref(), Some("Serial"));
        assert_eq!(entries[0].episode, 3);
        assert_eq!(entries[0].duration, 300);
        assert_eq!(
            entries[0].image_url.as_deref(),
            Some("https://tvgo.orange.pl/mnapi/epgimages/x.jpg")
        );
        assert_eq!(entries[1].kind, ProgramKind::Standalone);
        assert_eq!(entries[1].episode, 0);
    }

    #[test]
    fn query_shapes() {
        assert_eq!(
            FranceGuide.query("4"),
            vec![
                ("groupBy", "channel".to_string()),
                ("period", "current".to_string()),
                ("epgIds", "4".to_string()),
                ("mco", "OFR".to_string()),
            ]
        );
        assert_eq!(
            PolandGuide.query("14171"),
            vec![("hhTech", String::new()), ("deviceCat", "otg".to_string())]
        );
    }

    #[test]
    fn current_entry_exact_and_nearest() {
        let entries = vec![entry(100, 50), entry(150, 50)];
        assert_eq!(current_entry(&entries, 120, MatchMode::Exact).unwrap().start_time, 100);
        assert_eq!(current_entry(&entries, 160, MatchMode::Exact).unwrap().start_time, 150);
        // window end is exclusive
        assert_eq!(current_entry(&entries, 200, MatchMode::Exact), None);
        assert_eq!(
            current_entry(&entries, 200, MatchMode::Nearest).unwrap().start_time,
            100
        );
        assert_eq!(current_entry(&[], 200, MatchMode::Nearest), None);
    }

    #[test]
    fn cache_fresh_while_airing() {
        let mut cache = GuideCache::default();
        assert!(cache.fresh("4", 120).is_none());

        cache.store("4", vec![entry(100, 50)]);
        assert!(cache.fresh("4", 120).is_some());
        assert!(cache.fresh("4", 149).is_some());
        // program over: stale
        assert!(cache.fresh("4", 150).is_none());
        // other channels unaffected
        assert!(cache.fresh("118", 120).is_none());
    }

    #[test]
    fn cache_empty_payload_is_stale() {
        let mut cache = GuideCache::default();
        cache.store("4", Vec::new());
        assert!(cache.fresh("4", 0).is_none());
    }

    #[test]
    fn cache_store_replaces() {
        let mut cache = GuideCache::default();
        cache.store("4", vec![entry(100, 50)]);
        cache.store("4", vec![entry(150, 50)]);
        let fresh = cache.fresh("4", 160).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].start_time, 150);
    }
}
