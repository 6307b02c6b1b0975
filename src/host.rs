// ActionVM Host Collaborators
// The surface the interpreter needs from the player around it: output,
// host commands and timeline navigation

use crate::bytecode::ActionBuffer;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Callbacks for the handful of actions that reach outside the VM.
pub trait Host {
    fn trace(&self, message: &str);

    /// `get_url` with the `FSCommand:` prefix stripped.
    fn fscommand(&self, command: &str, args: &str) {
        log::info!("fscommand {} {}", command, args);
    }

    fn get_url(&self, url: &str, window: &str, method: u8) {
        log::info!("get_url {} window '{}' method {}", url, window, method);
    }

    fn stop_sounds(&self) {}

    fn toggle_quality(&self) {}
}

/// Sends trace output to the log.
#[derive(Debug, Default)]
pub struct LogHost;

impl Host for LogHost {
    fn trace(&self, message: &str) {
        log::info!("trace: {}", message);
    }
}

/// Keeps everything it is asked to do, for inspection by tests and tools.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub traces: RefCell<Vec<String>>,
    pub commands: RefCell<Vec<(String, String)>>,
    pub urls: RefCell<Vec<(String, String, u8)>>,
    pub sound_stops: Cell<u32>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<String> {
        self.traces.borrow().clone()
    }
}

impl Host for RecordingHost {
    fn trace(&self, message: &str) {
        self.traces.borrow_mut().push(message.to_string());
    }

    fn fscommand(&self, command: &str, args: &str) {
        self.commands
            .borrow_mut()
            .push((command.to_string(), args.to_string()));
    }

    fn get_url(&self, url: &str, window: &str, method: u8) {
        self.urls
            .borrow_mut()
            .push((url.to_string(), window.to_string(), method));
    }

    fn stop_sounds(&self) {
        self.sound_stops.set(self.sound_stops.get() + 1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Stopped,
}

/// Frame navigation of a clip. Frames are 0-based.
pub trait Timeline {
    fn current_frame(&self) -> u32;
    fn frame_count(&self) -> u32;
    fn goto_frame(&self, frame: u32);
    /// false when the label is unknown
    fn goto_labeled_frame(&self, label: &str) -> bool;
    fn label_frame(&self, label: &str) -> Option<u32>;
    fn play_state(&self) -> PlayState;
    fn set_play_state(&self, state: PlayState);
    fn frame_actions(&self, frame: u32) -> Vec<Rc<ActionBuffer>>;
}

/// In-process timeline: frames of action buffers plus a label table.
pub struct MovieClip {
    frames: RefCell<Vec<Vec<Rc<ActionBuffer>>>>,
    labels: RefCell<FxHashMap<String, u32>>,
    current: Cell<u32>,
    state: Cell<PlayState>,
}

impl Default for MovieClip {
    fn default() -> Self {
        Self::new()
    }
}

impl MovieClip {
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            labels: RefCell::new(FxHashMap::default()),
            current: Cell::new(0),
            state: Cell::new(PlayState::Playing),
        }
    }

    /// Append a frame; returns its index.
    pub fn add_frame(&self, actions: Vec<Rc<ActionBuffer>>) -> u32 {
        let mut frames = self.frames.borrow_mut();
        frames.push(actions);
        frames.len() as u32 - 1
    }

    pub fn add_label(&self, label: &str, frame: u32) {
        self.labels.borrow_mut().insert(label.to_ascii_lowercase(), frame);
    }
}

impl Timeline for MovieClip {
    fn current_frame(&self) -> u32 {
        self.current.get()
    }

    fn frame_count(&self) -> u32 {
        self.frames.borrow().len() as u32
    }

    fn goto_frame(&self, frame: u32) {
        let count = self.frame_count();
        if count == 0 {
            return;
        }
        self.current.set(frame.min(count - 1));
    }

    fn goto_labeled_frame(&self, label: &str) -> bool {
        match self.label_frame(label) {
            Some(frame) => {
                self.goto_frame(frame);
                true
            }
            None => false,
        }
    }

    fn label_frame(&self, label: &str) -> Option<u32> {
        self.labels.borrow().get(&label.to_ascii_lowercase()).copied()
    }

    fn play_state(&self) -> PlayState {
        self.state.get()
    }

    fn set_play_state(&self, state: PlayState) {
        self.state.set(state);
    }

    fn frame_actions(&self, frame: u32) -> Vec<Rc<ActionBuffer>> {
        self.frames
            .borrow()
            .get(frame as usize)
            .cloned()
            .unwrap_or_default()
    }
}
