/// A terminal geometry observation, in the units the `window-change` channel
/// request carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowChange {
    pub columns: u32,
    pub rows: u32,
    pub width_pixels: u32,
    pub height_pixels: u32,
}

impl WindowChange {
    pub fn new(columns: u32, rows: u32) -> Self {
        Self {
            columns,
            rows,
            width_pixels: 0,
            height_pixels: 0,
        }
    }
}

/// Deduplicates periodic terminal size polls so a `window-change` request is
/// only emitted when the geometry actually moved.
///
/// The first observation always reports: the far side has no geometry at all
/// until we tell it.
#[derive(Debug, Default)]
pub struct WindowTracker {
    last: Option<WindowChange>,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a poll result and returns the change to propagate, or `None`
    /// when the size is unchanged since the last reported observation.
    pub fn observe(&mut self, current: WindowChange) -> Option<WindowChange> {
        if self.last == Some(current) {
            return None;
        }
        self.last = Some(current);
        Some(current)
    }
}
