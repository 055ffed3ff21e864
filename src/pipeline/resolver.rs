//! Event resolution for raw (platform, handle) signals
//!
//! Precedence, first match wins:
//! 1. static rule for (platform, lowercase handle)
//! 2. an event window containing `now` whose lang is empty or equals the
//!    signal lang (case-insensitive)
//! 3. the synthetic "misc-live" community event
//!
//! A rule always beats a window, even when the window would also match.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FALLBACK_SLUG: &str = "misc-live";
pub const FALLBACK_TITLE: &str = "Community Live";
pub const FALLBACK_LEAGUE: &str = "Community";
const RULE_TITLE: &str = "Mapped by rule";
const WINDOW_TITLE: &str = "Window match";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRule {
    pub platform: String,
    pub handle: String,
    pub event_slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub event_slug: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub region: String,
    pub lang: String,
}

impl EventWindow {
    /// Inclusive on both ends
    pub fn contains(&self, now: i64) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    fn matches_lang(&self, lang: &str) -> bool {
        self.lang.is_empty() || self.lang.eq_ignore_ascii_case(lang)
    }
}

/// Labels of an event that already exists in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownEvent {
    pub slug: String,
    pub title: String,
    pub game: String,
    pub league: String,
}

/// Everything the resolver reads, loaded once per cycle
#[derive(Debug, Clone, Default)]
pub struct EventMapping {
    pub rules: Vec<StreamRule>,
    /// Checked in order
    pub windows: Vec<EventWindow>,
    pub events: Vec<KnownEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Rule,
    Window,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub slug: String,
    pub title: String,
    pub game: String,
    pub league: String,
    pub resolution: Resolution,
}

pub struct EventResolver {
    rules: HashMap<(String, String), String>,
    windows: Vec<EventWindow>,
    events: HashMap<String, KnownEvent>,
    default_game: String,
}

impl EventResolver {
    pub fn new(mapping: EventMapping, default_game: impl Into<String>) -> Self {
        let rules = mapping
            .rules
            .into_iter()
            .map(|r| ((r.platform.to_lowercase(), r.handle.to_lowercase()), r.event_slug))
            .collect();
        let events = mapping
            .events
            .into_iter()
            .map(|e| (e.slug.clone(), e))
            .collect();

        Self {
            rules,
            windows: mapping.windows,
            events,
            default_game: default_game.into(),
        }
    }

    pub fn resolve(&self, platform: &str, handle: &str, lang: &str, now: i64) -> ResolvedEvent {
        let key = (platform.trim().to_lowercase(), handle.trim().to_lowercase());

        if let Some(slug) = self.rules.get(&key) {
            return self.labelled(slug, RULE_TITLE, Resolution::Rule);
        }

        if let Some(window) = self
            .windows
            .iter()
            .find(|w| w.contains(now) && w.matches_lang(lang))
        {
            return self.labelled(&window.event_slug, WINDOW_TITLE, Resolution::Window);
        }

        ResolvedEvent {
            slug: FALLBACK_SLUG.to_string(),
            title: FALLBACK_TITLE.to_string(),
            game: self.default_game.clone(),
            league: FALLBACK_LEAGUE.to_string(),
            resolution: Resolution::Fallback,
        }
    }

    /// Reuse stored labels when the event exists, generic ones otherwise
    fn labelled(&self, slug: &str, generic_title: &str, resolution: Resolution) -> ResolvedEvent {
        match self.events.get(slug) {
            Some(event) => ResolvedEvent {
                slug: event.slug.clone(),
                title: event.title.clone(),
                game: event.game.clone(),
                league: event.league.clone(),
                resolution,
            },
            None => ResolvedEvent {
                slug: slug.to_string(),
                title: generic_title.to_string(),
                game: self.default_game.clone(),
                league: FALLBACK_LEAGUE.to_string(),
                resolution,
            },
        }
    }
}
