//! Output surface: where a turn writes what the user sees.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A clickable affordance offered to the user after a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    /// Text shown on the button
    pub label: String,

    /// Host command to run when activated
    pub command: String,

    /// Command arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

/// Write-only sink for turn output. Implementations must not block.
pub trait OutputSurface: Send + Sync {
    fn emit_text(&self, text: &str);

    fn emit_action_buttons(&self, buttons: &[ActionButton]);
}

/// One recorded write to a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceWrite {
    Text(String),
    Buttons(Vec<ActionButton>),
}

/// A surface that keeps every write in memory. Useful for hosts that
/// forward output elsewhere, and for tests.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    writes: Mutex<Vec<SurfaceWrite>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<SurfaceWrite> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// All emitted text, concatenated.
    pub fn text(&self) -> String {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                SurfaceWrite::Text(t) => Some(t),
                SurfaceWrite::Buttons(_) => None,
            })
            .collect()
    }

    fn record(&self, write: SurfaceWrite) {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(write);
        }
    }
}

impl OutputSurface for RecordingSurface {
    fn emit_text(&self, text: &str) {
        self.record(SurfaceWrite::Text(text.to_string()));
    }

    fn emit_action_buttons(&self, buttons: &[ActionButton]) {
        self.record(SurfaceWrite::Buttons(buttons.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_surface_keeps_order() {
        let surface = RecordingSurface::new();
        surface.emit_text("Hello ");
        surface.emit_action_buttons(&[ActionButton {
            label: "Open build log".into(),
            command: "open".into(),
            arguments: vec!["build.log".into()],
        }]);
        surface.emit_text("world");

        assert_eq!(surface.text(), "Hello world");
        let writes = surface.writes();
        assert_eq!(writes.len(), 3);
        assert!(matches!(writes[1], SurfaceWrite::Buttons(ref b) if b.len() == 1));
    }
}
