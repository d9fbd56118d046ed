//! The host's view of open tabs.
//!
//! The browser side reports tabs through `tabs-snapshot` and keeps the
//! picture current with per-tab events. The coarse sweep walks this
//! registry; the fine sweep follows its focused tab.

use std::collections::BTreeMap;
use std::sync::RwLock;

use booktimer_core::{TabId, WindowId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub tab_id: TabId,
    #[serde(default)]
    pub window_id: Option<WindowId>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl TabInfo {
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            window_id: None,
            url: String::new(),
            title: String::new(),
        }
    }
}

/// Where the scheduler learns which tabs exist.
pub trait TabSource: Send + Sync + 'static {
    fn list(&self) -> Vec<TabInfo>;
    fn get(&self, tab_id: TabId) -> Option<TabInfo>;
    fn focused(&self) -> Option<TabId>;
}

#[derive(Default)]
struct Reported {
    tabs: BTreeMap<TabId, TabInfo>,
    focused: Option<TabId>,
}

/// Tabs as last reported by the host.
#[derive(Default)]
pub struct ReportedTabs {
    inner: RwLock<Reported>,
}

impl ReportedTabs {
    fn write<T>(&self, f: impl FnOnce(&mut Reported) -> T) -> T {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    fn read<T>(&self, f: impl FnOnce(&Reported) -> T) -> T {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&inner)
    }

    /// Replace the whole picture. A focused id that is not in `tabs` is
    /// ignored.
    pub fn replace(&self, tabs: Vec<TabInfo>, focused: Option<TabId>) {
        self.write(|r| {
            r.tabs = tabs.into_iter().map(|t| (t.tab_id, t)).collect();
            r.focused = focused.filter(|id| r.tabs.contains_key(id));
        });
    }

    /// Merge a per-tab event into the registry and return the result.
    pub fn update(
        &self,
        tab_id: TabId,
        window_id: Option<WindowId>,
        url: Option<&str>,
        title: Option<&str>,
    ) -> TabInfo {
        self.write(|r| {
            let info = r.tabs.entry(tab_id).or_insert_with(|| TabInfo::new(tab_id));
            if window_id.is_some() {
                info.window_id = window_id;
            }
            if let Some(url) = url {
                info.url = url.to_string();
            }
            if let Some(title) = title {
                info.title = title.to_string();
            }
            info.clone()
        })
    }

    pub fn set_focused(&self, tab_id: TabId, window_id: Option<WindowId>) {
        self.update(tab_id, window_id, None, None);
        self.write(|r| r.focused = Some(tab_id));
    }

    pub fn remove(&self, tab_id: TabId) -> Option<TabInfo> {
        self.write(|r| {
            if r.focused == Some(tab_id) {
                r.focused = None;
            }
            r.tabs.remove(&tab_id)
        })
    }
}

impl TabSource for ReportedTabs {
    fn list(&self) -> Vec<TabInfo> {
        self.read(|r| r.tabs.values().cloned().collect())
    }

    fn get(&self, tab_id: TabId) -> Option<TabInfo> {
        self.read(|r| r.tabs.get(&tab_id).cloned())
    }

    fn focused(&self) -> Option<TabId> {
        self.read(|r| r.focused)
    }
}
