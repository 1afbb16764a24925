//! Process-backed host effectors.
//!
//! | Effector | Default command |
//! |---|---|
//! | speech (espeak) | `espeak --stdin`, text on stdin |
//! | speech (festival) | `festival --tts`, text on stdin |
//! | sound | `mpg123 -q <file>` |
//! | notification | `notify-send -u <urgency> -- <title> <body>` |
//! | power-off | `systemctl poweroff` |
//!
//! Free text never lands where it could be read as an option. Every command
//! is killed once it outlives [`HostCommands::timeout`].

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use kevinbot_types::{ComError, SpeechEngine};
use tracing::{debug, info, warn};

use crate::effector::{Notification, Notifier, PowerControl, Sound, SoundPlayer, Speaker, Urgency};

/// Command lines used by [`CommandHost`].  Each is `argv[0]` plus fixed
/// leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommands {
    pub espeak: Vec<String>,
    pub festival: Vec<String>,
    pub player: Vec<String>,
    pub notifier: Vec<String>,
    pub power_off: Vec<String>,
    pub low_battery_sound: PathBuf,
    pub device_notify_sound: PathBuf,
    /// Longest a single command may run before it is killed.
    pub timeout: Duration,
}

/// How often a running command is checked for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Default for HostCommands {
    fn default() -> Self {
        Self {
            espeak: argv(&["espeak", "--stdin"]),
            festival: argv(&["festival", "--tts"]),
            player: argv(&["mpg123", "-q"]),
            notifier: argv(&["notify-send"]),
            power_off: argv(&["systemctl", "poweroff"]),
            low_battery_sound: PathBuf::from("sounds/low-battery.mp3"),
            device_notify_sound: PathBuf::from("sounds/device-notify.wav"),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Festival mispronounces the robot's name; respell it.
pub fn festival_text(text: &str) -> String {
    text.replace("Kevinbot", "Kevinbought")
}

/// Host effectors implemented by spawning processes.
#[derive(Debug, Clone, Default)]
pub struct CommandHost {
    commands: HostCommands,
}

impl CommandHost {
    pub fn new(commands: HostCommands) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &HostCommands {
        &self.commands
    }
}

/// Run `base + args`, optionally feeding `stdin`, and wait at most `limit`.
fn run(
    action: &str,
    base: &[String],
    args: &[String],
    stdin: Option<&str>,
    limit: Duration,
) -> Result<(), ComError> {
    let (program, leading) = base
        .split_first()
        .ok_or_else(|| ComError::host(action, "no command configured"))?;

    let mut command = Command::new(program);
    command.args(leading).args(args).stdout(Stdio::null());
    if stdin.is_some() {
        command.stdin(Stdio::piped());
    }
    debug!(action, program = %program, "spawning host command");

    let mut child = command.spawn().map_err(|e| ComError::host(action, format!("{program}: {e}")))?;
    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes())
                .map_err(|e| ComError::host(action, e))?;
        }
    }
    let status = wait_bounded(&mut child, limit).map_err(|e| ComError::host(action, e))?;
    match status {
        Some(status) if status.success() => Ok(()),
        Some(status) => Err(ComError::host(action, format!("{program} exited with {status}"))),
        None => {
            warn!(action, program = %program, ?limit, "host command timed out; killed");
            Err(ComError::host(action, format!("{program} timed out after {limit:?}")))
        }
    }
}

/// `Ok(None)` when the child was still running at the deadline and had to
/// be killed.
fn wait_bounded(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

impl Speaker for CommandHost {
    fn speak(&self, engine: SpeechEngine, text: &str) -> Result<(), ComError> {
        match engine {
            SpeechEngine::Espeak => {
                let input = format!("{text}\n");
                run("speak", &self.commands.espeak, &[], Some(&input), self.commands.timeout)
            }
            SpeechEngine::Festival => {
                let input = format!("{}\n", festival_text(text));
                run("speak", &self.commands.festival, &[], Some(&input), self.commands.timeout)
            }
        }
    }
}

impl SoundPlayer for CommandHost {
    fn play(&self, sound: Sound) -> Result<(), ComError> {
        let path = match sound {
            Sound::LowBattery => &self.commands.low_battery_sound,
            Sound::DeviceNotify => &self.commands.device_notify_sound,
        };
        run(
            "play sound",
            &self.commands.player,
            &[path.display().to_string()],
            None,
            self.commands.timeout,
        )
    }
}

impl Notifier for CommandHost {
    fn notify(&self, notification: &Notification) -> Result<(), ComError> {
        let mut args = vec!["-u".to_string(), notification.urgency.as_str().to_string()];
        if notification.urgency == Urgency::Critical {
            args.extend(["-t".to_string(), "0".to_string()]);
        }
        args.extend(["--".to_string(), notification.title.clone(), notification.body.clone()]);
        run("notify", &self.commands.notifier, &args, None, self.commands.timeout)
    }
}

impl PowerControl for CommandHost {
    fn power_off(&self) -> Result<(), ComError> {
        info!("requesting host power-off");
        run("power off", &self.commands.power_off, &[], None, self.commands.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with(program: &[&str]) -> CommandHost {
        CommandHost::new(HostCommands {
            espeak: argv(program),
            festival: argv(program),
            player: argv(program),
            notifier: argv(program),
            power_off: argv(program),
            ..HostCommands::default()
        })
    }

    #[test]
    fn festival_respells_the_robot_name() {
        assert_eq!(festival_text("Hello, I am Kevinbot"), "Hello, I am Kevinbought");
    }

    #[cfg(unix)]
    #[test]
    fn successful_commands_are_ok() -> Result<(), Box<dyn std::error::Error>> {
        let mut commands = host_with(&["true"]).commands().clone();
        commands.espeak = argv(&["cat"]);
        commands.festival = argv(&["cat"]);
        let host = CommandHost::new(commands);
        host.speak(SpeechEngine::Espeak, "hello")?;
        host.speak(SpeechEngine::Festival, "hello Kevinbot")?;
        host.play(Sound::DeviceNotify)?;
        host.notify(&Notification::new("Ping!", "Ping from R1"))?;
        host.power_off()?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_a_host_error() {
        let host = host_with(&["false"]);
        match host.play(Sound::LowBattery) {
            Err(ComError::Host { action, .. }) => assert_eq!(action, "play sound"),
            other => panic!("expected host error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn espeak_text_is_never_parsed_as_options() -> Result<(), Box<dyn std::error::Error>> {
        // grep only matches when the text arrives on stdin; as an argument it
        // would name a missing file.
        let host = host_with(&["grep", "-qxF", "--", "-w /tmp/kevinbot.wav"]);
        host.speak(SpeechEngine::Espeak, "-w /tmp/kevinbot.wav")?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn notification_text_follows_the_option_terminator() -> Result<(), Box<dyn std::error::Error>> {
        let script = r#"[ "$1" = -u ] && [ "$3" = -- ] && [ "$4" = "--title" ] && [ "$5" = "-body" ]"#;
        let host = host_with(&["sh", "-c", script, "notify-send"]);
        host.notify(&Notification::new("--title", "-body"))?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn hung_command_is_killed_at_the_timeout() {
        let mut commands = host_with(&["sleep", "5"]).commands().clone();
        commands.timeout = Duration::from_millis(100);
        let host = CommandHost::new(commands);

        let started = Instant::now();
        match host.power_off() {
            Err(ComError::Host { action, .. }) => assert_eq!(action, "power off"),
            other => panic!("expected host error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_program_is_a_host_error() {
        let host = host_with(&["kevinbot-no-such-program"]);
        assert!(matches!(host.power_off(), Err(ComError::Host { .. })));
    }

    #[test]
    fn empty_command_line_is_rejected() {
        let host = host_with(&[]);
        assert!(host.speak(SpeechEngine::Espeak, "x").is_err());
    }
}
