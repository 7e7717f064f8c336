//! Screen capture and OCR collaborators.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};

/// Grabs the current screen as an encoded image (PNG).
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    async fn capture(&self) -> Result<Vec<u8>>;
}

/// Turns an encoded image into plain text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> Result<String>;
}

/// Runs an external program that writes one PNG frame to stdout, for
/// example `screencapture -x -t png /dev/stdout` or `grim -`.
pub struct CommandCapturer {
    program: String,
    args: Vec<String>,
}

impl CommandCapturer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ScreenCapturer for CommandCapturer {
    async fn capture(&self) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if output.stdout.is_empty() {
            bail!("{} produced no image data", self.program);
        }
        Ok(output.stdout)
    }
}

/// Tesseract CLI fed through stdin, so frames never touch the disk.
pub struct TesseractOcr {
    binary: String,
    language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: "tesseract".into(),
            language: "eng".into(),
        }
    }
}

impl TesseractOcr {
    pub fn new(binary: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", self.language.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.binary))?;

        let mut stdin = child
            .stdin
            .take()
            .context("tesseract stdin was not captured")?;

        let feed = async move {
            stdin.write_all(image).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.context("tesseract did not finish")?;
        fed.context("failed to stream frame to tesseract")?;
        if !output.status.success() {
            bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_capturer_returns_stdout() {
        let capturer = CommandCapturer::new("printf", vec!["frame-bytes".into()]);
        assert_eq!(capturer.capture().await.unwrap(), b"frame-bytes");
    }

    #[tokio::test]
    async fn command_capturer_reports_failure() {
        let capturer = CommandCapturer::new("false", vec![]);
        assert!(capturer.capture().await.is_err());
    }

    #[tokio::test]
    async fn command_capturer_rejects_empty_output() {
        let capturer = CommandCapturer::new("true", vec![]);
        let err = capturer.capture().await.unwrap_err();
        assert!(err.to_string().contains("no image data"));
    }

    #[tokio::test]
    async fn missing_ocr_binary_is_an_error() {
        let ocr = TesseractOcr::new("integrity-no-such-binary", "eng");
        assert!(ocr.extract_text(b"png").await.is_err());
    }
}
