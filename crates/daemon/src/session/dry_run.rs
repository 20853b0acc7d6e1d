//! Simulated pane sessions.
//!
//! A dry-run session behaves enough like an interactive shell to exercise the
//! whole protocol without launching an agent: it prints a welcome banner,
//! echoes typed input, handles backspace, and answers each submitted line
//! with a scripted response after a short random delay.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ProcessEvent;

/// Prompt printed after the banner and after every response.
pub const PROMPT: &str = "$ ";

/// Timing of scripted output.
#[derive(Debug, Clone, Copy)]
pub struct DryRunTiming {
    pub welcome_delay: Duration,
    pub response_min: Duration,
    pub response_max: Duration,
}

/// A simulated terminal session.
pub struct DryRunSession {
    pane_id: String,
    generation: u64,
    line: String,
    after_cr: bool,
    in_escape: bool,
    timing: DryRunTiming,
    events: mpsc::Sender<ProcessEvent>,
    scheduled: Vec<JoinHandle<()>>,
}

impl DryRunSession {
    /// Starts a session and schedules its welcome banner.
    pub fn start(
        pane_id: &str,
        generation: u64,
        banner: String,
        timing: DryRunTiming,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Self {
        let mut session = Self {
            pane_id: pane_id.to_string(),
            generation,
            line: String::new(),
            after_cr: false,
            in_escape: false,
            timing,
            events,
            scheduled: Vec::new(),
        };
        session.schedule(timing.welcome_delay, banner);
        session
    }

    /// Processes input and returns the text to echo immediately.
    ///
    /// CR or LF submits the buffered line (a CR LF pair submits once);
    /// backspace and DEL erase one character; escape sequences and other
    /// control bytes are swallowed.
    pub fn input(&mut self, data: &str) -> String {
        let mut echo = String::new();

        for c in data.chars() {
            if self.in_escape {
                // ESC [ params final-byte, or a two-byte ESC x sequence.
                if c != '[' && ('@'..='~').contains(&c) {
                    self.in_escape = false;
                }
                continue;
            }

            let after_cr = std::mem::replace(&mut self.after_cr, false);
            match c {
                '\n' if after_cr => {}
                '\r' | '\n' => {
                    self.after_cr = c == '\r';
                    echo.push_str("\r\n");
                    let line = std::mem::take(&mut self.line);
                    self.submit(line);
                }
                '\u{7f}' | '\u{8}' => {
                    if self.line.pop().is_some() {
                        echo.push_str("\u{8} \u{8}");
                    }
                }
                '\u{1b}' => self.in_escape = true,
                c if c.is_control() => {}
                c => {
                    self.line.push(c);
                    echo.push(c);
                }
            }
        }

        echo
    }

    #[cfg(test)]
    fn pending_line(&self) -> &str {
        &self.line
    }

    /// Cancels every scheduled output.
    pub fn stop(&mut self) {
        for task in self.scheduled.drain(..) {
            task.abort();
        }
    }

    fn submit(&mut self, line: String) {
        let line = line.trim().to_string();
        let response = if line.is_empty() {
            PROMPT.to_string()
        } else {
            format!("[dry-run] received: {}\r\n{}", line, PROMPT)
        };

        let min = self.timing.response_min.as_millis() as u64;
        let max = self.timing.response_max.as_millis() as u64;
        let delay = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        self.schedule(Duration::from_millis(delay), response);
    }

    fn schedule(&mut self, delay: Duration, data: String) {
        self.scheduled.retain(|task| !task.is_finished());

        let events = self.events.clone();
        let pane_id = self.pane_id.clone();
        let generation = self.generation;
        self.scheduled.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events
                .send(ProcessEvent::Output {
                    pane_id,
                    generation,
                    data,
                })
                .await;
        }));
    }
}

impl Drop for DryRunSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Welcome banner naming the pane and where it runs.
pub fn welcome_banner(pane_id: &str, name: Option<&str>, cwd: &str) -> String {
    let label = match name {
        Some(name) => format!("pane {} ({})", pane_id, name),
        None => format!("pane {}", pane_id),
    };
    format!(
        "[dry-run] agentmux simulated session for {}\r\n[dry-run] cwd: {}\r\n{}",
        label, cwd, PROMPT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> DryRunTiming {
        DryRunTiming {
            welcome_delay: Duration::from_millis(300),
            response_min: Duration::from_millis(150),
            response_max: Duration::from_millis(600),
        }
    }

    async fn next_output(rx: &mut mpsc::Receiver<ProcessEvent>) -> String {
        match rx.recv().await {
            Some(ProcessEvent::Output { data, .. }) => data,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_welcome_banner_after_delay() {
        let (tx, mut rx) = mpsc::channel(16);
        let banner = welcome_banner("3", Some("Reviewer"), "/work/three");
        let _session = DryRunSession::start("3", 1, banner, timing(), tx);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        let banner = next_output(&mut rx).await;
        assert!(banner.contains("pane 3 (Reviewer)"));
        assert!(banner.contains("/work/three"));
        assert!(banner.ends_with(PROMPT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_then_scripted_response() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = DryRunSession::start("1", 1, String::new(), timing(), tx);
        next_output(&mut rx).await;

        assert_eq!(session.input("echo hi"), "echo hi");
        // Nothing is scheduled before the carriage return.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(session.input("\r"), "\r\n");
        let response = next_output(&mut rx).await;
        assert_eq!(response, format!("[dry-run] received: echo hi\r\n{}", PROMPT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crlf_submits_once() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = DryRunSession::start("1", 1, String::new(), timing(), tx);
        next_output(&mut rx).await;

        assert_eq!(session.input("ls\r\n"), "ls\r\n");
        next_output(&mut rx).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backspace_and_escape_sequences() {
        let (tx, _rx) = mpsc::channel(16);
        let mut session = DryRunSession::start("1", 1, String::new(), timing(), tx);

        assert_eq!(session.input("abc\u{7f}"), "abc\u{8} \u{8}");
        assert_eq!(session.pending_line(), "ab");
        // Arrow key and a stray bell are swallowed.
        assert_eq!(session.input("\u{1b}[A\u{7}d"), "d");
        assert_eq!(session.pending_line(), "abd");
        // Backspace on an empty line echoes nothing.
        session.input("\u{8}\u{8}\u{8}");
        assert_eq!(session.input("\u{8}"), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_line_reprints_prompt() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = DryRunSession::start("1", 1, String::new(), timing(), tx);
        next_output(&mut rx).await;

        session.input("\r");
        assert_eq!(next_output(&mut rx).await, PROMPT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_scheduled_output() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = DryRunSession::start("1", 1, "banner".to_string(), timing(), tx);
        session.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
