/// Keyboard intent delivered by the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Escape or `q`.
    Quit,
    /// Space: advance immediately.
    Skip,
    /// `r` or Enter: rescan now while waiting for media.
    Retry,
}

/// Out-of-band requests from signal handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-read the settings file and rescan the media directory.
    Reload,
    /// Advance to the next item.
    Skip,
    /// Run the sync collaborator regardless of the rate limit.
    ForceSync,
}
