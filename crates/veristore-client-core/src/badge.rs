//! Presentation state for the history trigger and panel.
//!
//! The surfaces themselves live in the UI toolkit; this module derives what
//! they render. The one behavioral obligation is that opening the panel marks
//! the history as viewed; [`PanelState::open`] hands that effect back to the
//! caller instead of reaching into the reconciler.

use serde::Serialize;

use crate::reconciler::NotificationSnapshot;

const BADGE_LABEL_CAP: u64 = 99;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeState {
    pub visible: bool,
    pub label: Option<String>,
    pub pending_dot: bool,
}

impl BadgeState {
    #[must_use]
    pub fn from_snapshot(snapshot: &NotificationSnapshot) -> Self {
        if snapshot.is_loading {
            return Self {
                visible: false,
                label: None,
                pending_dot: false,
            };
        }

        let label = if snapshot.new_count == 0 {
            None
        } else if snapshot.new_count > BADGE_LABEL_CAP {
            Some(format!("{BADGE_LABEL_CAP}+"))
        } else {
            Some(snapshot.new_count.to_string())
        };

        Self {
            visible: snapshot.has_notification,
            label,
            pending_dot: snapshot.has_pending,
        }
    }
}

/// Effect the surface must perform after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelEffect {
    MarkAsViewed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PanelState {
    open: bool,
}

impl PanelState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Open the panel. First transition yields the mark-as-viewed effect.
    pub fn open(&mut self) -> Option<PanelEffect> {
        if self.open {
            return None;
        }
        self.open = true;
        Some(PanelEffect::MarkAsViewed)
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}
