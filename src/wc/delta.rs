//! Windowed application of incoming text deltas.
//!
//! The delta sender describes a file's new pristine text as a sequence of
//! windows, each a run of instructions copying from the old pristine base
//! or supplying fresh bytes. The handler streams the reconstruction into
//! the staging text base; a `None` window ends the stream. On failure the
//! staging file is removed so nothing half-written survives.

use std::cell::Cell;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;

use super::error::{WcError, WcResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaInstruction {
    /// Copy a range out of the source text base.
    CopySource { offset: usize, len: usize },
    /// Fresh bytes from the sender.
    New(Vec<u8>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaWindow {
    pub ops: Vec<DeltaInstruction>,
}

impl DeltaWindow {
    /// A window replacing the whole text, the degenerate delta a checkout
    /// or a full-text sender produces.
    pub fn full_text(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            ops: vec![DeltaInstruction::New(bytes.into())],
        }
    }
}

/// Applies delta windows against the source base, writing the staging
/// text base. Obtained from `apply_textdelta`; feed windows with
/// [`WindowHandler::apply`] and finish with a `None` window.
#[derive(Debug)]
pub struct WindowHandler {
    source: Option<Vec<u8>>,
    dest: Option<fs::File>,
    dest_path: PathBuf,
    text_changed: Rc<Cell<bool>>,
    finished: bool,
}

impl WindowHandler {
    pub(crate) fn new(
        source: Option<Vec<u8>>,
        dest: fs::File,
        dest_path: PathBuf,
        text_changed: Rc<Cell<bool>>,
    ) -> Self {
        Self {
            source,
            dest: Some(dest),
            dest_path,
            text_changed,
            finished: false,
        }
    }

    /// Apply one window, or finish the stream with `None`.
    pub fn apply(&mut self, window: Option<&DeltaWindow>) -> WcResult<()> {
        match self.apply_inner(window) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Failed mid-stream: drop the staging file.
                self.dest = None;
                self.finished = true;
                if let Err(cleanup) = fs::remove_file(&self.dest_path) {
                    tracing::warn!(
                        "failed to remove staging base {}: {cleanup}",
                        self.dest_path.display()
                    );
                }
                Err(err)
            }
        }
    }

    fn apply_inner(&mut self, window: Option<&DeltaWindow>) -> WcResult<()> {
        let dest = self.dest.as_mut().ok_or_else(|| {
            WcError::UnsupportedFeature("text delta stream already closed".to_string())
        })?;
        let Some(window) = window else {
            dest.flush()?;
            dest.sync_all()?;
            self.dest = None;
            self.finished = true;
            self.text_changed.set(true);
            return Ok(());
        };
        for op in &window.ops {
            match op {
                DeltaInstruction::CopySource { offset, len } => {
                    let source = self.source.as_ref().ok_or_else(|| {
                        WcError::UnsupportedFeature(
                            "delta copies from a source this file does not have".to_string(),
                        )
                    })?;
                    let end = offset.checked_add(*len).filter(|end| *end <= source.len());
                    let Some(end) = end else {
                        return Err(WcError::UnsupportedFeature(format!(
                            "delta source range {offset}+{len} out of bounds"
                        )));
                    };
                    dest.write_all(&source[*offset..end])?;
                }
                DeltaInstruction::New(bytes) => {
                    dest.write_all(bytes)?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for WindowHandler {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned stream (the edit is being unwound): best-effort
            // removal of the staging file.
            self.dest = None;
            let _ = fs::remove_file(&self.dest_path);
        }
    }
}
