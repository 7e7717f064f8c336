//! Screen and keystroke capture loops.

pub mod controller;
pub mod engines;
pub mod health;
pub mod keystroke_worker;
mod loop_worker;
pub mod phash;

pub use controller::CaptureController;
pub use engines::{CommandCapturer, OcrEngine, ScreenCapturer, TesseractOcr};
pub use health::CaptureHealth;
pub use keystroke_worker::{KeystrokeTap, TapEvent};
