//! Coordinator state definitions.

/// Rate coordinator operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Fiat display is switched off; nothing is fetched.
    Disabled,
    /// Enabled, no quotes for the current selection yet.
    Idle,
    /// A spot refresh is in flight.
    Refreshing,
    /// Quotes for the current selection are cached.
    Ready,
}

impl CoordinatorState {
    /// Check if the feed is switched on.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, CoordinatorState::Disabled)
    }

    /// Check if a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        matches!(self, CoordinatorState::Refreshing)
    }
}

/// Outcome of one host tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Feed disabled, nothing done.
    Disabled,
    /// A refresh for the current selection is still running.
    InFlight,
    /// The refresh interval has not elapsed.
    NotDue,
    /// A refresh task was spawned.
    Started,
}
