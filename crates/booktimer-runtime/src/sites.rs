//! Per-domain enable flags (`rt_site_enable`).

use std::collections::BTreeMap;
use std::sync::RwLock;

use booktimer_core::Site;
use serde_json::Value;

/// Domain → enabled. Supported sites default to enabled; a missing
/// domain counts as enabled.
pub struct SiteFlags {
    flags: RwLock<BTreeMap<String, bool>>,
}

impl SiteFlags {
    fn defaults() -> BTreeMap<String, bool> {
        Site::ALL
            .into_iter()
            .map(|site| (site.domain().to_string(), true))
            .collect()
    }

    /// Defaults overlaid with the boolean entries of a stored object.
    pub fn from_stored(value: Option<&Value>) -> Self {
        let flags = Self {
            flags: RwLock::new(Self::defaults()),
        };
        if let Some(value) = value {
            flags.replace_from(value);
        }
        flags
    }

    /// Reset to defaults, then apply the stored object. Non-boolean
    /// entries are skipped.
    pub fn replace_from(&self, value: &Value) {
        let mut next = Self::defaults();
        if let Value::Object(map) = value {
            for (domain, enabled) in map {
                match enabled.as_bool() {
                    Some(enabled) => {
                        next.insert(domain.clone(), enabled);
                    }
                    None => tracing::warn!(domain = %domain, "ignoring non-boolean site flag"),
                }
            }
        }
        *self.flags.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    pub fn is_enabled(&self, site: Site) -> bool {
        self.flags
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(site.domain())
            .copied()
            .unwrap_or(true)
    }

    pub fn set(&self, site: Site, enabled: bool) {
        self.flags
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(site.domain().to_string(), enabled);
    }

    pub fn to_value(&self) -> Value {
        let flags = self.flags.read().unwrap_or_else(|e| e.into_inner());
        Value::Object(
            flags
                .iter()
                .map(|(domain, enabled)| (domain.clone(), Value::Bool(*enabled)))
                .collect(),
        )
    }
}
