//! A `/bin/sh` stand-in for the bus daemon.
//!
//! The script understands the same `--print-address=<fd>` and
//! `--config-file=<path>` arguments as the real daemon, prints a fixed
//! address on the descriptor, and then sleeps until terminated. Running it
//! through `sh -c` avoids writing an executable to disk during tests.

use std::fs;
use std::path::PathBuf;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tempfile::TempDir;
use testbus_config::HarnessConfig;

/// Address printed by the stand-in in [`FakeMode::Address`].
pub const FAKE_ADDRESS: &str = "unix:path=/tmp/testbus-fake,guid=0123456789abcdef";

const SCRIPT: &str = r#"
fd=""; conf=""; copy=""; mode="address"
for arg in "$@"; do
  case "$arg" in
    --print-address=*) fd="${arg#--print-address=}" ;;
    --config-file=*) conf="${arg#--config-file=}" ;;
    --copy-config=*) copy="${arg#--copy-config=}" ;;
    --mode=*) mode="${arg#--mode=}" ;;
  esac
done
if [ -n "$copy" ]; then
  cp "$conf" "$copy"
  echo "$conf" > "$copy.path"
fi
case "$mode" in
  address) eval "echo 'unix:path=/tmp/testbus-fake,guid=0123456789abcdef' >&$fd" ;;
  garbage) eval "echo 'not an address' >&$fd" ;;
  blank) eval "echo '' >&$fd" ;;
  silent) exit 3 ;;
esac
exec sleep 600
"#;

const MONITOR_SCRIPT: &str = r#"[ "$1" = --address ] && [ -n "$2" ] || exit 4
exec sleep 600
"#;

/// What the stand-in prints on its address descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    /// A valid address.
    Address,
    /// Text that is not an address.
    Garbage,
    /// An empty line.
    Blank,
    /// Nothing; the script exits immediately.
    Silent,
}

impl FakeMode {
    const fn as_arg(self) -> &'static str {
        match self {
            Self::Address => "--mode=address",
            Self::Garbage => "--mode=garbage",
            Self::Blank => "--mode=blank",
            Self::Silent => "--mode=silent",
        }
    }
}

/// Scratch space plus configuration for the stand-in daemon.
pub struct FakeDaemon {
    dir: TempDir,
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create scratch directory"),
        }
    }

    /// Harness configuration launching the stand-in in `mode`.
    pub fn config(&self, mode: FakeMode) -> HarnessConfig {
        let copy = format!("--copy-config={}", self.copy_path().display());
        HarnessConfig::default()
            .with_daemon_program("/bin/sh")
            .with_daemon_args([
                "-c".to_owned(),
                SCRIPT.to_owned(),
                "fake-daemon".to_owned(),
                copy,
                mode.as_arg().to_owned(),
            ])
    }

    /// Like [`Self::config`], with a stand-in monitor that stays up only when
    /// it was handed `--address <address>`.
    pub fn config_with_monitor(&self, mode: FakeMode) -> HarnessConfig {
        self.config(mode)
            .with_monitor(true)
            .with_monitor_program("/bin/sh")
            .with_monitor_args(["-c", MONITOR_SCRIPT, "fake-monitor"])
    }

    /// The configuration document the stand-in received.
    pub fn received_config(&self) -> String {
        fs::read_to_string(self.copy_path()).expect("stand-in copied its configuration")
    }

    /// Path the configuration document was handed over at.
    pub fn received_config_path(&self) -> PathBuf {
        let recorded = fs::read_to_string(self.copy_path().with_extension("conf.path"))
            .expect("stand-in recorded its configuration path");
        PathBuf::from(recorded.trim_end())
    }

    fn copy_path(&self) -> PathBuf {
        self.dir.path().join("received.conf")
    }
}

/// Whether `pid` still names a process (zombies included).
pub fn process_exists(pid: u32) -> bool {
    let raw = i32::try_from(pid).expect("pid fits pid_t");
    kill(Pid::from_raw(raw), None).is_ok()
}
