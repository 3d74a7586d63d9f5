//! In-app history so "back" walks through tabs, sub-tabs, modals and post
//! details instead of leaving the site.
//!
//! The stack always starts at the gallery tab.  Only going back from that
//! initial entry leaves the app.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NavigationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tab {
    Gallery,
    Feed,
    Board,
    Messages,
    UserSearch,
    Profile,
}

impl Tab {
    pub const ALL: [Tab; 6] = [
        Tab::Gallery,
        Tab::Feed,
        Tab::Board,
        Tab::Messages,
        Tab::UserSearch,
        Tab::Profile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tab::Gallery => "gallery",
            Tab::Feed => "feed",
            Tab::Board => "board",
            Tab::Messages => "messages",
            Tab::UserSearch => "user-search",
            Tab::Profile => "profile",
        }
    }

    pub fn requires_login(self) -> bool {
        matches!(self, Tab::Messages | Tab::Profile)
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tab {
    type Err = NavigationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('#');
        Tab::ALL
            .into_iter()
            .find(|tab| tab.as_str() == s)
            .ok_or_else(|| NavigationError::UnknownTab(s.to_string()))
    }
}

/// Which list a post detail was opened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Gallery,
    Feed,
    Board,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HistoryEntry {
    Tab { tab: Tab, scroll: u32 },
    ProfileTab { sub: String },
    Modal { id: String },
    /// A post detail, remembering where the list was scrolled to.
    Detail {
        kind: PostKind,
        id: String,
        previous_scroll: u32,
    },
}

impl HistoryEntry {
    /// URL fragment shown for this entry.
    pub fn fragment(&self) -> String {
        match self {
            HistoryEntry::Tab { tab, .. } => format!("#{tab}"),
            HistoryEntry::ProfileTab { sub } => format!("#profile/{sub}"),
            HistoryEntry::Modal { id } => format!("#{id}"),
            HistoryEntry::Detail { id, .. } => format!("#post/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackOutcome {
    /// Show `entry` again, scrolled to `scroll` when known.
    Restore {
        entry: HistoryEntry,
        scroll: Option<u32>,
    },
    /// Back from the initial entry: let the user leave.
    ExitSite,
}

#[derive(Debug, Clone)]
pub struct Navigator {
    stack: Vec<HistoryEntry>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            stack: vec![HistoryEntry::Tab {
                tab: Tab::Gallery,
                scroll: 0,
            }],
        }
    }

    pub fn current(&self) -> &HistoryEntry {
        // The initial entry is never popped.
        &self.stack[self.stack.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push_tab(&mut self, tab: Tab, scroll: u32) {
        self.stack.push(HistoryEntry::Tab { tab, scroll });
    }

    /// Followers and following share one sub-tab.
    pub fn push_profile_tab(&mut self, sub: &str) {
        let sub = match sub {
            "followers" | "following" => "follow",
            other => other,
        };
        self.stack.push(HistoryEntry::ProfileTab {
            sub: sub.to_string(),
        });
    }

    pub fn push_modal(&mut self, id: &str) {
        self.stack.push(HistoryEntry::Modal { id: id.to_string() });
    }

    pub fn push_detail(&mut self, kind: PostKind, id: &str, previous_scroll: u32) {
        self.stack.push(HistoryEntry::Detail {
            kind,
            id: id.to_string(),
            previous_scroll,
        });
    }

    pub fn back(&mut self) -> BackOutcome {
        if self.stack.len() <= 1 {
            return BackOutcome::ExitSite;
        }
        let Some(popped) = self.stack.pop() else {
            return BackOutcome::ExitSite;
        };
        let entry = self.current().clone();
        let scroll = match (&popped, &entry) {
            (HistoryEntry::Detail { previous_scroll, .. }, _) => Some(*previous_scroll),
            (_, HistoryEntry::Tab { scroll, .. }) => Some(*scroll),
            _ => None,
        };
        BackOutcome::Restore { entry, scroll }
    }

    /// Nearest tab at or below the top of the stack.
    pub fn active_tab(&self) -> Tab {
        self.stack
            .iter()
            .rev()
            .find_map(|entry| match entry {
                HistoryEntry::Tab { tab, .. } => Some(*tab),
                HistoryEntry::ProfileTab { .. } => Some(Tab::Profile),
                _ => None,
            })
            .unwrap_or(Tab::Gallery)
    }
}
