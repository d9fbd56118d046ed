//! Policy constants, persisted as the `rt_settings` blob.
//!
//! Every field has a default so partial or older blobs merge cleanly;
//! `version` is stamped with [`CURRENT_VERSION`] on every merge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SettingsError;
use crate::types::Site;

/// Version stamped into persisted settings.
pub const CURRENT_VERSION: u32 = 100;

/// Upper bound for any millisecond setting.
const MAX_MS: u64 = 365 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Sessions shorter than this are held as a `short` pending.
    pub min_session_ms: u64,
    /// Period of the AUTO_FLUSH pass.
    pub realtime_flush_ms: u64,
    pub live_push_interval_ms: u64,
    pub live_push_min_gap_ms: u64,
    pub title_stable_default_ms: u64,
    pub title_stable_pixiv_ms: u64,
    /// A tab must be visible this long before a session can start.
    pub visibility_stabilize_ms: u64,
    /// No interaction for this long pauses with IDLE_HOLD.
    pub idle_hold_ms: u64,
    pub pending_absorb_window_ms: u64,
    pub pending_short_timeout_ms: u64,
    pub pending_segment_timeout_ms: u64,
    pub global_scan_interval_ms: u64,
    pub focused_poll_interval_ms: u64,
    pub start_grace_ms: u64,
    pub recent_interaction_skip_start_grace_ms: u64,
    pub idle_resume_grace_ms: u64,
    pub narou_rate_window_ms: u64,
    pub narou_rate_max_per_window: u32,
    pub narou_cache_ttl_ms: u64,
    pub promote_debounce_ms: u64,
    pub promote_debounce_pixiv_ms: u64,
    /// Commit a below-minimum session when its tab is closed.
    pub commit_on_close_below_min: bool,
    pub version: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_session_ms: 4_000,
            realtime_flush_ms: 5_000,
            live_push_interval_ms: 1_500,
            live_push_min_gap_ms: 500,
            title_stable_default_ms: 500,
            title_stable_pixiv_ms: 200,
            visibility_stabilize_ms: 150,
            idle_hold_ms: 20_000,
            pending_absorb_window_ms: 15_000,
            pending_short_timeout_ms: 15_000,
            pending_segment_timeout_ms: 60_000,
            global_scan_interval_ms: 2_000,
            focused_poll_interval_ms: 200,
            start_grace_ms: 500,
            recent_interaction_skip_start_grace_ms: 2_000,
            idle_resume_grace_ms: 2_000,
            narou_rate_window_ms: 60_000,
            narou_rate_max_per_window: 20,
            narou_cache_ttl_ms: 86_400_000,
            promote_debounce_ms: 600,
            promote_debounce_pixiv_ms: 200,
            commit_on_close_below_min: true,
            version: CURRENT_VERSION,
        }
    }
}

impl Settings {
    /// Load a persisted blob field by field. Fields that fail to parse or
    /// validate keep their defaults and are returned by name; a blob that
    /// is not an object is reported as `"*"`.
    pub fn from_stored(value: Option<&Value>) -> (Self, Vec<String>) {
        let mut settings = Self::default();
        let Some(value) = value else {
            return (settings, Vec::new());
        };
        let Value::Object(fields) = value else {
            return (settings, vec!["*".to_string()]);
        };
        let mut rejected = Vec::new();
        for (key, field) in fields {
            let mut single = serde_json::Map::new();
            single.insert(key.clone(), field.clone());
            match settings.merged(&Value::Object(single)) {
                Ok(next) => settings = next,
                Err(_) => rejected.push(key.clone()),
            }
        }
        (settings, rejected)
    }

    /// Apply a partial JSON object on top of `self` and validate.
    pub fn merged(&self, patch: &Value) -> Result<Self, SettingsError> {
        let Value::Object(patch) = patch else {
            return Err(SettingsError::Malformed("expected an object".into()));
        };
        let mut base = serde_json::to_value(self).map_err(|e| SettingsError::Malformed(e.to_string()))?;
        if let Value::Object(fields) = &mut base {
            for (key, value) in patch {
                if fields.contains_key(key) {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
        let mut next: Self =
            serde_json::from_value(base).map_err(|e| SettingsError::Malformed(e.to_string()))?;
        next.version = CURRENT_VERSION;
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let positive = [
            ("realtimeFlushMs", self.realtime_flush_ms),
            ("livePushIntervalMs", self.live_push_interval_ms),
            ("globalScanIntervalMs", self.global_scan_interval_ms),
            ("focusedPollIntervalMs", self.focused_poll_interval_ms),
            ("narouRateWindowMs", self.narou_rate_window_ms),
            ("narouRateMaxPerWindow", u64::from(self.narou_rate_max_per_window)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::ZeroValue(*name));
        }

        let bounded = [
            ("minSessionMs", self.min_session_ms),
            ("realtimeFlushMs", self.realtime_flush_ms),
            ("livePushIntervalMs", self.live_push_interval_ms),
            ("livePushMinGapMs", self.live_push_min_gap_ms),
            ("titleStableDefaultMs", self.title_stable_default_ms),
            ("titleStablePixivMs", self.title_stable_pixiv_ms),
            ("visibilityStabilizeMs", self.visibility_stabilize_ms),
            ("idleHoldMs", self.idle_hold_ms),
            ("pendingAbsorbWindowMs", self.pending_absorb_window_ms),
            ("pendingShortTimeoutMs", self.pending_short_timeout_ms),
            ("pendingSegmentTimeoutMs", self.pending_segment_timeout_ms),
            ("globalScanIntervalMs", self.global_scan_interval_ms),
            ("focusedPollIntervalMs", self.focused_poll_interval_ms),
            ("startGraceMs", self.start_grace_ms),
            ("recentInteractionSkipStartGraceMs", self.recent_interaction_skip_start_grace_ms),
            ("idleResumeGraceMs", self.idle_resume_grace_ms),
            ("narouRateWindowMs", self.narou_rate_window_ms),
            ("narouCacheTtlMs", self.narou_cache_ttl_ms),
            ("promoteDebounceMs", self.promote_debounce_ms),
            ("promoteDebouncePixivMs", self.promote_debounce_pixiv_ms),
        ];
        if let Some((name, _)) = bounded.iter().find(|(_, v)| *v > MAX_MS) {
            return Err(SettingsError::TooLarge(*name));
        }
        Ok(())
    }

    /// Quiet window before a title counts as stable.
    pub fn title_stable_ms(&self, site: Option<Site>) -> u64 {
        match site {
            Some(Site::Pixiv) => self.title_stable_pixiv_ms,
            _ => self.title_stable_default_ms,
        }
    }

    /// Minimum gap between two promotions of the same tab.
    pub fn promote_debounce_for(&self, site: Option<Site>) -> u64 {
        match site {
            Some(Site::Pixiv) => self.promote_debounce_pixiv_ms,
            _ => self.promote_debounce_ms,
        }
    }

    /// Absorb window for a pending of the given timeout.
    pub fn absorb_window_ms(&self, kind_timeout_ms: u64) -> u64 {
        self.pending_absorb_window_ms.min(kind_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_blob_merges_with_defaults() {
        let s = Settings::default()
            .merged(&json!({"minSessionMs": 1000, "unknownKey": 5}))
            .expect("merge");
        assert_eq!(s.min_session_ms, 1000);
        assert_eq!(s.idle_hold_ms, 20_000);
        assert_eq!(s.version, CURRENT_VERSION);
    }

    #[test]
    fn older_version_is_restamped() {
        let (s, rejected) = Settings::from_stored(Some(&json!({"version": 3, "idleHoldMs": 9000})));
        assert!(rejected.is_empty());
        assert_eq!(s.version, CURRENT_VERSION);
        assert_eq!(s.idle_hold_ms, 9000);
    }

    #[test]
    fn zero_interval_rejected() {
        let err = Settings::default()
            .merged(&json!({"focusedPollIntervalMs": 0}))
            .expect_err("zero");
        assert_eq!(err, SettingsError::ZeroValue("focusedPollIntervalMs"));
    }

    #[test]
    fn wrong_type_and_non_object_rejected() {
        assert!(matches!(
            Settings::default().merged(&json!({"idleHoldMs": "soon"})),
            Err(SettingsError::Malformed(_))
        ));
        assert!(matches!(
            Settings::default().merged(&json!([1, 2])),
            Err(SettingsError::Malformed(_))
        ));
        assert!(matches!(
            Settings::default().merged(&json!({"idleHoldMs": MAX_MS + 1})),
            Err(SettingsError::TooLarge("idleHoldMs"))
        ));
    }

    #[test]
    fn unreadable_stored_blob_falls_back() {
        let (s, rejected) = Settings::from_stored(Some(&json!("garbage")));
        assert_eq!(s, Settings::default());
        assert_eq!(rejected, vec!["*"]);
        assert_eq!(Settings::from_stored(None), (Settings::default(), Vec::new()));
    }

    #[test]
    fn one_bad_stored_field_keeps_the_rest() {
        let stored = json!({
            "minSessionMs": 8000,
            "idleHoldMs": "soon",
            "focusedPollIntervalMs": 0,
            "pendingAbsorbWindowMs": 9000,
        });
        let (s, mut rejected) = Settings::from_stored(Some(&stored));
        rejected.sort();
        assert_eq!(s.min_session_ms, 8000);
        assert_eq!(s.pending_absorb_window_ms, 9000);
        assert_eq!(s.idle_hold_ms, 20_000);
        assert_eq!(s.focused_poll_interval_ms, 200);
        assert_eq!(rejected, vec!["focusedPollIntervalMs", "idleHoldMs"]);
    }

    #[test]
    fn pixiv_uses_shorter_windows() {
        let s = Settings::default();
        assert_eq!(s.title_stable_ms(Some(Site::Pixiv)), 200);
        assert_eq!(s.title_stable_ms(Some(Site::Narou)), 500);
        assert_eq!(s.promote_debounce_for(Some(Site::Pixiv)), 200);
        assert_eq!(s.promote_debounce_for(None), 600);
        assert_eq!(s.absorb_window_ms(s.pending_segment_timeout_ms), 15_000);
    }
}
