//! Host process detection, termination, and relaunch.
//!
//! Matching is by exact image name; a substring match could hit unrelated
//! processes and make `terminate` report success against the wrong victim.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use swx_domain::HostLayout;

const QUIT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const QUIT_POLL_ATTEMPTS: u32 = 10;

/// Seam between the orchestrator and the real process table, so workflows
/// are testable without a host install.
pub trait HostProcess {
    fn is_running(&self) -> bool;
    /// Cooperative quit with a bounded wait, then a forced kill. True only
    /// once the host is observed gone.
    fn terminate(&self) -> bool;
    /// Detached spawn; the caller never owns or waits on the child.
    fn launch(&self) -> bool;
}

pub struct SystemProcessController {
    image_name: String,
    executable: PathBuf,
}

impl SystemProcessController {
    #[must_use]
    pub fn new(layout: &HostLayout) -> Self {
        Self {
            image_name: layout.image_name().to_string(),
            executable: layout.executable(),
        }
    }

    #[must_use]
    pub fn for_image(image_name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            image_name: image_name.into(),
            executable: executable.into(),
        }
    }

    fn request_quit(&self) {
        #[cfg(target_os = "macos")]
        {
            let app = self.image_name.trim_end_matches(".app");
            let script = format!("tell application \"{app}\" to quit");
            let _ = Command::new("osascript")
                .args(["-e", &script])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            let _ = Command::new("pkill")
                .args(["-TERM", "-x", &self.image_name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
        #[cfg(windows)]
        {
            let _ = Command::new("taskkill")
                .args(["/IM", &self.image_name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }

    fn force_kill(&self) {
        #[cfg(unix)]
        {
            let _ = Command::new("pkill")
                .args(["-9", "-x", &self.image_name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
        #[cfg(windows)]
        {
            let _ = Command::new("taskkill")
                .args(["/F", "/IM", &self.image_name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

impl HostProcess for SystemProcessController {
    fn is_running(&self) -> bool {
        #[cfg(unix)]
        {
            match Command::new("pgrep").args(["-x", &self.image_name]).output() {
                Ok(output) => !output.stdout.is_empty(),
                Err(err) => {
                    warn!(%err, "pgrep unavailable; assuming host is not running");
                    false
                }
            }
        }
        #[cfg(windows)]
        {
            let filter = format!("IMAGENAME eq {}", self.image_name);
            match Command::new("tasklist")
                .args(["/FI", &filter, "/NH"])
                .output()
            {
                Ok(output) => String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .any(|line| line.contains(&self.image_name) && !line.contains("INFO:")),
                Err(err) => {
                    warn!(%err, "tasklist unavailable; assuming host is not running");
                    false
                }
            }
        }
    }

    fn terminate(&self) -> bool {
        if !self.is_running() {
            return true;
        }

        debug!(image = %self.image_name, "requesting cooperative quit");
        self.request_quit();
        for _ in 0..QUIT_POLL_ATTEMPTS {
            thread::sleep(QUIT_POLL_INTERVAL);
            if !self.is_running() {
                return true;
            }
        }

        debug!(image = %self.image_name, "escalating to forced kill");
        self.force_kill();
        thread::sleep(Duration::from_secs(1));
        !self.is_running()
    }

    fn launch(&self) -> bool {
        #[cfg(target_os = "macos")]
        let spawned = {
            let app = self.image_name.trim_end_matches(".app");
            Command::new("open")
                .args(["-a", app])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
        };
        #[cfg(not(target_os = "macos"))]
        let spawned = Command::new(&self.executable)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(_child) => true,
            Err(err) => {
                warn!(%err, executable = %self.executable.display(), "failed to launch host");
                false
            }
        }
    }
}
