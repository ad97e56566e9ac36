//! OscReceiver (component E): real-time control plane.
//!
//! Listens on a UDP socket for OSC 1.0 packets, grounded on
//! `original_source/pybinsim/application.py`'s `python-osc`-based
//! dispatcher and `example/press_key_to_trigger_event.py`'s wire
//! addresses. Per original-channel state is a "value + dirty flag" cell:
//! the control thread is the sole writer, the audio thread the sole
//! reader, and only the latest message per channel survives
//! (last-writer-wins), matching the original's plain-dict callback state.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use rosc::{OscMessage, OscPacket, OscType};

use crate::error::ControlError;

/// Pose update for one audio channel: its coordinate tuple and whether
/// the engine should crossfade into the new filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub coordinates: Vec<i32>,
    pub dirty: bool,
}

struct ChannelCell {
    coordinates: Vec<i32>,
    dirty: bool,
}

struct Shared {
    channels: HashMap<usize, ChannelCell>,
    sound_file_request: Option<String>,
    scene_events: Vec<(String, String, String)>,
}

/// OSC address used for per-channel pose updates: `/pyBinSimFilter
/// <channel:int> <coords: float...>`.
const ADDR_POSE: &str = "/pyBinSimFilter";
/// OSC address requesting a new main playlist: `/pyBinSimFile <path:string>`.
const ADDR_FILE: &str = "/pyBinSimFile";
/// OSC address controlling a named scene event:
/// `/pyBinSimSoundevent <id:string> <action:string> <playlist:string>`.
const ADDR_SOUNDEVENT: &str = "/pyBinSimSoundevent";

/// UDP/OSC control listener. Construction spawns a background thread that
/// owns the socket; the handle only ever reads shared state.
pub struct OscReceiver {
    shared: Arc<Mutex<Shared>>,
    running: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
    local_addr: std::net::SocketAddr,
}

impl OscReceiver {
    pub fn bind(addr: &str, num_channels: usize) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(std::time::Duration::from_millis(200)))?;
        let local_addr = socket.local_addr()?;

        let mut channels = HashMap::new();
        for ch in 0..num_channels {
            channels.insert(
                ch,
                ChannelCell {
                    coordinates: Vec::new(),
                    dirty: false,
                },
            );
        }

        let shared = Arc::new(Mutex::new(Shared {
            channels,
            sound_file_request: None,
            scene_events: Vec::new(),
        }));
        let running = Arc::new(AtomicBool::new(true));

        let listener = {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("binsim-control".into())
                .spawn(move || Self::run(socket, shared, running))
                .expect("failed to spawn control thread")
        };

        Ok(Self {
            shared,
            running,
            listener: Some(listener),
            local_addr,
        })
    }

    /// Address the listener socket actually bound to; useful when `bind`
    /// was given port `0` and the OS picked an ephemeral one.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    fn run(socket: UdpSocket, shared: Arc<Mutex<Shared>>, running: Arc<AtomicBool>) {
        let mut buf = [0u8; 4096];
        while running.load(Ordering::Acquire) {
            let (size, _addr) = match socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "control socket read failed");
                    continue;
                }
            };

            match rosc::decoder::decode_udp(&buf[..size]) {
                Ok((_, packet)) => Self::handle_packet(packet, &shared),
                Err(e) => tracing::warn!(error = ?e, "failed to decode OSC packet"),
            }
        }
    }

    fn handle_packet(packet: OscPacket, shared: &Arc<Mutex<Shared>>) {
        match packet {
            OscPacket::Message(msg) => {
                if let Err(e) = Self::apply_message(msg, shared) {
                    tracing::warn!(error = %e, "rejected control message");
                }
            }
            OscPacket::Bundle(bundle) => {
                for entry in bundle.content {
                    Self::handle_packet(entry, shared);
                }
            }
        }
    }

    fn apply_message(msg: OscMessage, shared: &Arc<Mutex<Shared>>) -> Result<(), ControlError> {
        match msg.addr.as_str() {
            ADDR_POSE => {
                let mut args = msg.args.into_iter();
                let channel = match args.next() {
                    Some(OscType::Int(i)) => i as usize,
                    Some(OscType::Float(f)) => f as usize,
                    other => {
                        return Err(ControlError::BadArguments {
                            address: ADDR_POSE.to_string(),
                            detail: format!("expected channel index, got {other:?}"),
                        })
                    }
                };
                let coordinates: Vec<i32> = args
                    .map(|a| match a {
                        OscType::Int(i) => Ok(i),
                        OscType::Float(f) => Ok(f.round() as i32),
                        other => Err(ControlError::BadArguments {
                            address: ADDR_POSE.to_string(),
                            detail: format!("expected numeric coordinate, got {other:?}"),
                        }),
                    })
                    .collect::<Result<_, _>>()?;

                let mut state = shared.lock().unwrap();
                let cell = state.channels.entry(channel).or_insert_with(|| ChannelCell {
                    coordinates: Vec::new(),
                    dirty: false,
                });
                cell.coordinates = coordinates;
                cell.dirty = true;
                Ok(())
            }
            ADDR_FILE => {
                let path = match msg.args.into_iter().next() {
                    Some(OscType::String(s)) => s,
                    other => {
                        return Err(ControlError::BadArguments {
                            address: ADDR_FILE.to_string(),
                            detail: format!("expected string path, got {other:?}"),
                        })
                    }
                };
                shared.lock().unwrap().sound_file_request = Some(path);
                Ok(())
            }
            ADDR_SOUNDEVENT => {
                let mut args = msg.args.into_iter();
                let (id, action, playlist) = (args.next(), args.next(), args.next());
                match (id, action, playlist) {
                    (Some(OscType::String(id)), Some(OscType::String(action)), playlist) => {
                        let playlist = match playlist {
                            Some(OscType::String(p)) => p,
                            _ => String::new(),
                        };
                        shared.lock().unwrap().scene_events.push((id, action, playlist));
                        Ok(())
                    }
                    _ => Err(ControlError::BadArguments {
                        address: ADDR_SOUNDEVENT.to_string(),
                        detail: "expected (id: string, action: string, [playlist: string])".to_string(),
                    }),
                }
            }
            other => Err(ControlError::UnknownAddress(other.to_string())),
        }
    }

    /// True if any channel has received an update since the last
    /// `get_current_values` call for it.
    pub fn is_filter_update_necessary(&self, channel: usize) -> bool {
        self.shared
            .lock()
            .unwrap()
            .channels
            .get(&channel)
            .is_some_and(|c| c.dirty)
    }

    /// Reads and clears a channel's dirty flag, returning its latest
    /// coordinates. Empty coordinates mean no update has ever arrived.
    pub fn get_current_values(&self, channel: usize) -> ChannelUpdate {
        let mut state = self.shared.lock().unwrap();
        let cell = state.channels.entry(channel).or_insert_with(|| ChannelCell {
            coordinates: Vec::new(),
            dirty: false,
        });
        let update = ChannelUpdate {
            coordinates: cell.coordinates.clone(),
            dirty: cell.dirty,
        };
        cell.dirty = false;
        update
    }

    /// Takes the most recently requested main-playlist path, if any has
    /// arrived since the last call.
    pub fn take_sound_file_request(&self) -> Option<String> {
        self.shared.lock().unwrap().sound_file_request.take()
    }

    /// Drains pending scene-event control messages as `(id, action,
    /// playlist)` triples.
    pub fn drain_scene_events(&self) -> Vec<(String, String, String)> {
        std::mem::take(&mut self.shared.lock().unwrap().scene_events)
    }

    pub fn close(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OscReceiver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::{OscMessage, OscPacket, OscType};
    use std::net::UdpSocket;

    fn send(target: &str, packet: OscPacket) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let bytes = rosc::encoder::encode(&packet).unwrap();
        socket.send_to(&bytes, target).unwrap();
    }

    #[test]
    fn pose_update_marks_channel_dirty_and_is_cleared_on_read() {
        let receiver = OscReceiver::bind("127.0.0.1:0", 2).unwrap();
        let addr = receiver.local_addr().to_string();

        send(
            &addr,
            OscPacket::Message(OscMessage {
                addr: ADDR_POSE.to_string(),
                args: vec![OscType::Int(0), OscType::Int(1), OscType::Int(2)],
            }),
        );

        wait_for(|| receiver.is_filter_update_necessary(0));
        let update = receiver.get_current_values(0);
        assert_eq!(update.coordinates, vec![1, 2]);
        assert!(update.dirty);
        assert!(!receiver.is_filter_update_necessary(0));
        receiver.close();
    }

    #[test]
    fn unknown_address_does_not_panic_the_listener() {
        let receiver = OscReceiver::bind("127.0.0.1:0", 1).unwrap();
        let addr = receiver.local_addr().to_string();
        send(
            &addr,
            OscPacket::Message(OscMessage {
                addr: "/totallyUnknown".to_string(),
                args: vec![],
            }),
        );
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!receiver.is_filter_update_necessary(0));
        receiver.close();
    }

    fn wait_for(mut predicate: impl FnMut() -> bool) {
        for _ in 0..50 {
            if predicate() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}
