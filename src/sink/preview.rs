//! Live terminal preview of the reconstruction.
//!
//! Shows the index and geometry of the last emitted frame together with the
//! output rate. In plain mode the bar is hidden and the sink only counts.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Instant;

use super::FrameSink;
use crate::frame::Frame;
use crate::ui::format_duration;

pub struct PreviewSink {
    bar: ProgressBar,
    started: Instant,
    last: Option<Instant>,
    frames_shown: u64,
}

impl PreviewSink {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style =
                ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} frames {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            started: Instant::now(),
            last: None,
            frames_shown: 0,
        }
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }
}

impl FrameSink for PreviewSink {
    fn name(&self) -> String {
        "preview".to_string()
    }

    fn is_display(&self) -> bool {
        true
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let now = Instant::now();
        let interval = now.duration_since(self.last.unwrap_or(self.started));
        self.last = Some(now);
        self.frames_shown += 1;
        self.bar.set_position(self.frames_shown);
        self.bar.set_message(format!(
            "| frame {} {}x{} | {} since previous",
            frame.index(),
            frame.width(),
            frame.height(),
            format_duration(interval)
        ));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.bar.finish_with_message(format!(
            "| {} frames in {}",
            self.frames_shown,
            format_duration(self.started.elapsed())
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn hidden_preview_counts_frames() -> Result<()> {
        let mut sink = PreviewSink::new(false);
        assert!(sink.is_display());
        for index in 0..3 {
            sink.write(&Frame::from_luma(index, Array2::zeros((2, 2)))?)?;
        }
        sink.finish()?;
        assert_eq!(sink.frames_shown(), 3);
        Ok(())
    }
}
