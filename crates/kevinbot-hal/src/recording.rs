//! Recording host used by tests and `--dry-run`.
//!
//! Nothing is spoken, played or powered off; every call is appended to an
//! in-memory log instead.

use std::sync::{Mutex, PoisonError};

use kevinbot_types::{ComError, SpeechEngine};
use tracing::info;

use crate::effector::{Notification, Notifier, PowerControl, Sound, SoundPlayer, Speaker};

/// One recorded host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    Speak { engine: SpeechEngine, text: String },
    Play(Sound),
    Notify(Notification),
    PowerOff,
}

#[derive(Debug, Default)]
pub struct RecordingHost {
    actions: Mutex<Vec<HostAction>>,
}

impl RecordingHost {
    pub fn actions(&self) -> Vec<HostAction> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, predicate: impl Fn(&HostAction) -> bool) -> usize {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| predicate(a))
            .count()
    }

    pub fn clear(&self) {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, action: HostAction) {
        info!(?action, "host action (recorded)");
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

impl Speaker for RecordingHost {
    fn speak(&self, engine: SpeechEngine, text: &str) -> Result<(), ComError> {
        self.record(HostAction::Speak {
            engine,
            text: text.to_string(),
        });
        Ok(())
    }
}

impl SoundPlayer for RecordingHost {
    fn play(&self, sound: Sound) -> Result<(), ComError> {
        self.record(HostAction::Play(sound));
        Ok(())
    }
}

impl Notifier for RecordingHost {
    fn notify(&self, notification: &Notification) -> Result<(), ComError> {
        self.record(HostAction::Notify(notification.clone()));
        Ok(())
    }
}

impl PowerControl for RecordingHost {
    fn power_off(&self) -> Result<(), ComError> {
        self.record(HostAction::PowerOff);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_call_order() -> Result<(), Box<dyn std::error::Error>> {
        let host = RecordingHost::default();
        host.play(Sound::DeviceNotify)?;
        host.speak(SpeechEngine::Espeak, "hello")?;

        assert_eq!(
            host.actions(),
            vec![
                HostAction::Play(Sound::DeviceNotify),
                HostAction::Speak {
                    engine: SpeechEngine::Espeak,
                    text: "hello".to_string()
                },
            ]
        );
        assert_eq!(host.count(|a| matches!(a, HostAction::Play(_))), 1);

        host.clear();
        assert!(host.actions().is_empty());
        Ok(())
    }
}
