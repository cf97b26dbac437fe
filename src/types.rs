// src/types.rs

// Commands sent to a viewer; applied at the start of its next tick
#[derive(Clone, Debug, PartialEq)]
pub enum ViewerCommand {
    ScaleUp,
    ScaleDown,
    WidenTimeRange,
    NarrowTimeRange,
    PageUp,
    PageDown,
    // 0-based stream channel
    ToggleChannelMask(usize),
    SwitchStream(String),
    SelectFilter(String),
    SetRereference(bool),
    SetStandardize(bool),
    SetZeroMean(bool),
    TogglePause,
    StartRecording(String),
    StopRecording,
    Close,
}

impl ViewerCommand {
    /// Keyboard binding: arrows scale and stretch, page keys flip channel pages.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "uparrow" => Some(Self::ScaleUp),
            "downarrow" => Some(Self::ScaleDown),
            "leftarrow" => Some(Self::NarrowTimeRange),
            "rightarrow" => Some(Self::WidenTimeRange),
            "pageup" => Some(Self::PageUp),
            "pagedown" => Some(Self::PageDown),
            _ => None,
        }
    }
}

// Messages a viewer sends back out
#[derive(Clone, Debug, PartialEq)]
pub enum ViewerNotice {
    Log(String),
    Rejected(String),
    RecordingStatus(bool),
    StreamSwitched(String),
    // close refused until the recording can be written
    CloseBlocked(String),
    Closed,
}
