//! [`Effectors`] – the bundle of host drivers handed to the bridge.

use std::sync::Arc;

use crate::effector::{Notifier, PowerControl, SoundPlayer, Speaker};

/// One driver per host concern.
///
/// Cloning is cheap; every clone shares the same drivers.
#[derive(Clone)]
pub struct Effectors {
    pub speaker: Arc<dyn Speaker>,
    pub sounds: Arc<dyn SoundPlayer>,
    pub notifier: Arc<dyn Notifier>,
    pub power: Arc<dyn PowerControl>,
}

impl Effectors {
    /// Use one host object for every concern.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: Speaker + SoundPlayer + Notifier + PowerControl + 'static,
    {
        Self {
            speaker: host.clone(),
            sounds: host.clone(),
            notifier: host.clone(),
            power: host,
        }
    }
}
