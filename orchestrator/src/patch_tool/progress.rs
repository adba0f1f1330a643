use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::constants::patchmgr::PROGRESS_PATTERN;
use crate::remote::SharedExecutor;

/// Best-effort tail of the console log. Re-logs the latest progress line
/// when it changes and stops when dropped.
pub struct ProgressWatcher {
    handle: JoinHandle<()>,
    last_line: Arc<Mutex<Option<String>>>,
}

impl ProgressWatcher {
    pub fn spawn(
        executor: SharedExecutor,
        host: String,
        console_log: String,
        interval: Duration,
        command_timeout: Duration,
    ) -> Self {
        let last_line = Arc::new(Mutex::new(None));
        let shared = last_line.clone();
        let command = format!(
            "grep -E '{}' {} | tail -1",
            PROGRESS_PATTERN, console_log
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            loop {
                ticker.tick().await;
                let line = match executor.run(&host, &command, command_timeout).await {
                    Ok(out) => out.first_line().map(str::to_string),
                    Err(e) => {
                        debug!("Progress read on {} failed: {}", host, e);
                        continue;
                    }
                };
                let Some(line) = line else { continue };
                if let Ok(mut last) = shared.lock() {
                    if last.as_deref() != Some(line.as_str()) {
                        info!(target: "patch_tool", "[{}] {}", host, line);
                        *last = Some(line);
                    }
                }
            }
        });

        Self { handle, last_line }
    }

    pub fn last_line(&self) -> Option<String> {
        self.last_line.lock().ok().and_then(|l| l.clone())
    }
}

impl Drop for ProgressWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
