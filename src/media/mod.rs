mod adapter;
mod device;
mod recorder;
pub mod synthetic;

pub use adapter::{CaptureInfo, MediaCaptureAdapter};
pub use device::{
    CaptureDevice, CaptureHandle, CaptureKind, MediaTrack, PreviewTarget, SegmentSource, TrackKind,
};
pub use recorder::{ScreenRecorder, Segment};
