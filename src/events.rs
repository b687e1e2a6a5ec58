use serde::Serialize;

use crate::config::GenerationSettings;
use crate::render::TurnView;

/// Transcript and session changes pushed to connected clients so they can redraw.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    TurnAppended(TurnView),
    Cleared,
    RequestFailed { message: String },
    SettingsChanged(GenerationSettings),
}
