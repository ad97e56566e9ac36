//! SceneHandler (supplement): named, independently controllable sound
//! events layered on top of the single default playlist.
//!
//! Grounded on `original_source/pybinsim/soundhandling.py`'s
//! `SoundSceneHandler`/`SoundEvent`, which the spec's distillation
//! dropped but which original_source implements as a first-class feature:
//! a control message can start, stop, pause, or resume a named event by
//! id, independent of the main playlist's playback state.
//!
//! This is a state registry only: it tracks which named events are
//! playing/paused and their playlist spec, reachable via
//! `Engine::scene()`. Unlike `SoundSceneHandler`, it does not drive its
//! own `SoundHandler` per event or feed audio into the mix — wiring a
//! registered event to an actual render path is unimplemented.

use std::collections::HashMap;
use std::sync::Mutex;

/// Playback state of one named sound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Playing,
    Paused,
    Stopped,
}

struct SoundEvent {
    playlist_spec: String,
    state: EventState,
}

/// A registry of named sound events, each independently startable,
/// pausable, and stoppable via control messages
/// (`/pyBinSimSoundevent`-style addresses in the original).
pub struct SceneHandler {
    events: Mutex<HashMap<String, SoundEvent>>,
}

impl Default for SceneHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneHandler {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a named event and marks it playing.
    pub fn start(&self, id: &str, playlist_spec: &str) {
        let mut events = self.events.lock().unwrap();
        events.insert(
            id.to_string(),
            SoundEvent {
                playlist_spec: playlist_spec.to_string(),
                state: EventState::Playing,
            },
        );
    }

    pub fn stop(&self, id: &str) {
        let mut events = self.events.lock().unwrap();
        events.remove(id);
    }

    pub fn pause(&self, id: &str) {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.get_mut(id) {
            event.state = EventState::Paused;
        }
    }

    pub fn resume(&self, id: &str) {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.get_mut(id) {
            event.state = EventState::Playing;
        }
    }

    pub fn state_of(&self, id: &str) -> Option<EventState> {
        self.events.lock().unwrap().get(id).map(|e| e.state)
    }

    pub fn playlist_of(&self, id: &str) -> Option<String> {
        self.events.lock().unwrap().get(id).map(|e| e.playlist_spec.clone())
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.state == EventState::Playing)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_an_event_makes_it_active() {
        let scene = SceneHandler::new();
        scene.start("footsteps", "sounds/footsteps.wav");
        assert_eq!(scene.state_of("footsteps"), Some(EventState::Playing));
        assert_eq!(scene.active_ids(), vec!["footsteps".to_string()]);
    }

    #[test]
    fn pause_removes_event_from_active_set_without_forgetting_it() {
        let scene = SceneHandler::new();
        scene.start("rain", "sounds/rain.wav");
        scene.pause("rain");
        assert_eq!(scene.state_of("rain"), Some(EventState::Paused));
        assert!(scene.active_ids().is_empty());
        scene.resume("rain");
        assert_eq!(scene.state_of("rain"), Some(EventState::Playing));
    }

    #[test]
    fn stop_forgets_the_event_entirely() {
        let scene = SceneHandler::new();
        scene.start("thunder", "sounds/thunder.wav");
        scene.stop("thunder");
        assert_eq!(scene.state_of("thunder"), None);
    }
}
