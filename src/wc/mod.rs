//! The working copy: on-disk reflection of a versioned tree plus local
//! modifications, and the machinery that updates it safely.
//!
//! Mutations to a directory funnel through its journal under the
//! directory lock, so an interrupted update is replayed to completion
//! before anything else touches that directory. The update editor
//! receives the incoming delta through an ordered callback protocol and
//! hands each file to the installer, which reconciles the new pristine
//! text with uncommitted local modifications.

pub mod anchor;
pub mod delta;
pub mod editor;
pub mod entries;
mod error;
pub mod install;
pub mod lock;
pub mod log;
pub mod paths;
pub mod props;
pub mod status;
pub mod textdiff;
pub mod translate;

pub use anchor::{actual_target, is_wc_root};
pub use delta::{DeltaInstruction, DeltaWindow, WindowHandler};
pub use editor::{
    checkout_editor, send_full_text, switch_editor, update_editor, DirScope, EditorMode,
    EditorSpec, FileScope, UpdateEditor,
};
pub use entries::{Entries, Entry, EntryFields, Schedule, THIS_DIR};
pub use error::{WcError, WcResult};
pub use install::{install_file, InstallOptions};
pub use lock::{AdmLock, LockError};
pub use log::{has_pending_log, run_pending_log, LogJournal, LogOp};
pub use props::{prop_kind, PropChange, PropKind, PropMap};
pub use status::{status, statuses, Status, StatusKind};
pub use translate::{text_modified, EolStyle, Keywords};
