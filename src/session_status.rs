/// Where a session is in its per-request lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// Loaded from the store and not touched since.
    #[default]
    Unchanged,
    /// Mutated in memory; the store has not seen the change yet.
    Changed,
    /// Written by a successful save.
    Saved,
    /// Removed from the store. Terminal.
    Destroyed,
}
