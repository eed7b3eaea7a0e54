use std::fmt;

/// Lifecycle of a remote-backed collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StoreState {
    /// Never loaded.
    #[default]
    NotLoaded,
    /// Attached to a listener, waiting for rows.
    Loading,
    /// Rows are live.
    Loaded,
    /// Detached; rows may be stale.
    Dirty,
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreState::NotLoaded => "not_loaded",
            StoreState::Loading => "loading",
            StoreState::Loaded => "loaded",
            StoreState::Dirty => "dirty",
        }
    }

    /// States from which `load_data` starts a new load.
    pub fn can_load(&self) -> bool {
        matches!(self, StoreState::NotLoaded | StoreState::Dirty)
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
