//! Core error types
//!
//! Every error here is recoverable: the registry is left in its
//! last-consistent state and the caller may keep pumping notifications.
//! Fatal conditions (loss of the X connection) are signaled by the
//! surrounding backend code, never raised from the core.

use thiserror::Error;

use crate::registry::WindowId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A window is already tracked under this id.
    #[error("window {0} is already tracked")]
    DuplicateWindow(WindowId),

    /// A caller named a window that is not tracked.
    #[error("window {0} is not tracked")]
    UnknownWindow(WindowId),

    /// A notification referenced a window the mirror never saw a Create
    /// for. Possible when tracking started after the window already
    /// existed; the mutation is skipped and processing continues.
    #[error("notification references untracked window {0}")]
    UnknownWindowReference(WindowId),

    /// The pixel format scan was exhausted without a match for the
    /// window's depth. The renderer may skip the window for this frame.
    #[error("no compatible pixel format for depth {depth}")]
    NoCompatibleFormat { depth: u8 },

    /// A capability call against the windowing server or GPU failed.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
