//! Media Module - Wiedergabe der Avatar-Antwort
//!
//! Nimmt eine [`MediaReference`] entgegen, wählt Stream oder Download
//! und tauscht den sichtbaren Inhalt ohne Flackern aus.

mod cue;
mod download;
mod pipeline;
mod reference;
mod renderer;

pub use cue::{AudioCue, SilentCue};
#[cfg(feature = "native-audio")]
pub use cue::{CueError, RingbackTone};
pub use download::AssetDownloader;
pub use pipeline::{MediaEvent, MediaPipelineController, PipelineConfig, PlaybackError};
pub use reference::{MediaPlan, MediaReference, PlaybackHandle, PlaybackSource};
pub use renderer::{
    HeadlessRenderer, ItemId, MediaRenderer, PreparedItem, RenderError, RendererSignal,
};
