//! Provider payload normalization to the canonical `LiveSignal`
//!
//! Pure: no I/O, no clock. Missing optional fields default (viewers to 0,
//! language to empty).

use super::types::LiveSignal;
use crate::provider::{ProviderPayload, StatusPayload, TwitchStream};

pub fn normalize(platform: &str, handle: &str, payload: &ProviderPayload) -> LiveSignal {
    let platform = platform.trim().to_lowercase();
    let handle = handle.trim().to_lowercase();

    match payload {
        ProviderPayload::Twitch(stream) => from_twitch(platform, handle, stream),
        ProviderPayload::Status(status) => from_status(platform, handle, status),
    }
}

fn from_twitch(platform: String, handle: String, stream: &TwitchStream) -> LiveSignal {
    LiveSignal {
        platform,
        handle,
        viewers: clamp_viewers(stream.viewer_count),
        is_live: stream.stream_type.as_deref() == Some("live"),
        lang: clean_lang(stream.language.as_deref()),
        started_at: stream
            .started_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.timestamp()),
    }
}

fn from_status(platform: String, handle: String, status: &StatusPayload) -> LiveSignal {
    LiveSignal {
        platform,
        handle,
        viewers: clamp_viewers(status.viewers),
        is_live: status.is_live.unwrap_or(false),
        lang: clean_lang(status.language.as_deref()),
        started_at: status.started_at,
    }
}

fn clamp_viewers(viewers: Option<i64>) -> u32 {
    viewers.unwrap_or(0).clamp(0, u32::MAX as i64) as u32
}

fn clean_lang(lang: Option<&str>) -> String {
    lang.map(|l| l.trim().to_lowercase()).unwrap_or_default()
}
