//! Log pump: streams a dev process's merged output to the client and
//! discovers the server's reachable URL from it.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dev::process::ChildOutput;
use crate::protocol::ServerMessage;
use crate::session::DevEndpoint;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("valid ansi regex"));

/// Local-address URLs printed by dev servers (Vite, Next, CRA, ...).
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1\])(?::\d+)?(?:/\S*)?)")
        .expect("valid url regex")
});

/// Remove terminal color/escape sequences.
pub fn strip_ansi(line: &str) -> String {
    ANSI_RE.replace_all(line, "").into_owned()
}

/// Extract the first local-address URL from a log line, if any.
pub fn detect_url(line: &str) -> Option<String> {
    URL_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Pump the child's stdout and stderr until both close (process exit) or the
/// task is cancelled. Every line is ANSI-stripped and forwarded as a
/// `dev_log`; the first line carrying a local-address URL sets the session's
/// discovered URL exactly once and emits `dev_url`.
pub async fn pump_logs(
    output: ChildOutput,
    endpoint: Arc<DevEndpoint>,
    outbound: UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
) {
    let mut out_lines = BufReader::new(output.stdout).lines();
    let mut err_lines = BufReader::new(output.stderr).lines();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            res = out_lines.next_line(), if !out_done => match res {
                Ok(Some(line)) => Some(line),
                _ => {
                    out_done = true;
                    None
                }
            },
            res = err_lines.next_line(), if !err_done => match res {
                Ok(Some(line)) => Some(line),
                _ => {
                    err_done = true;
                    None
                }
            },
        };

        let Some(line) = line else { continue };
        let plain = strip_ansi(&line);

        if endpoint.url().is_none() {
            if let Some(url) = detect_url(&plain) {
                if endpoint.set_url_once(&url) {
                    info!(%url, "dev server url discovered");
                    if outbound.send(ServerMessage::DevUrl { url }).is_err() {
                        break;
                    }
                }
            }
        }

        if outbound.send(ServerMessage::DevLog { line: plain }).is_err() {
            break;
        }
    }

    debug!("log pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        let colored = "\x1b[32m➜\x1b[39m  \x1b[1mLocal\x1b[22m:   http://localhost:5174/";
        assert_eq!(strip_ansi(colored), "➜  Local:   http://localhost:5174/");
    }

    #[test]
    fn detects_vite_style_url() {
        assert_eq!(
            detect_url("  ➜  Local:   http://localhost:5174/"),
            Some("http://localhost:5174/".to_string())
        );
    }

    #[test]
    fn detects_next_style_url() {
        assert_eq!(
            detect_url("- Local:        http://localhost:3000"),
            Some("http://localhost:3000".to_string())
        );
        assert_eq!(
            detect_url("ready started server on http://0.0.0.0:3000"),
            Some("http://0.0.0.0:3000".to_string())
        );
    }

    #[test]
    fn detects_loopback_and_v6() {
        assert_eq!(
            detect_url("listening on http://127.0.0.1:8080/app"),
            Some("http://127.0.0.1:8080/app".to_string())
        );
        assert_eq!(
            detect_url("listening on https://[::1]:8443"),
            Some("https://[::1]:8443".to_string())
        );
    }

    #[test]
    fn ignores_external_hosts_and_plain_lines() {
        assert_eq!(detect_url("see https://vitejs.dev/config/"), None);
        assert_eq!(detect_url("compiled successfully"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pump_forwards_lines_and_discovers_url_once() {
        use crate::dev::process::spawn_dev;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("fake-dev.sh"),
            "echo starting\n\
             echo 'Local: http://localhost:4321/'\n\
             echo 'Local: http://localhost:9999/'\n\
             echo done 1>&2\n",
        )
        .unwrap();

        let (mut proc, output) = spawn_dev("sh fake-dev.sh", dir.path(), 4321).unwrap();
        let endpoint = Arc::new(DevEndpoint::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        pump_logs(output, endpoint.clone(), tx, cancel).await;
        let _ = proc.child.wait().await;

        let mut urls = Vec::new();
        let mut logs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ServerMessage::DevUrl { url } => urls.push(url),
                ServerMessage::DevLog { line } => logs.push(line),
                other => panic!("unexpected message {other:?}"),
            }
        }

        assert_eq!(urls, ["http://localhost:4321/"]);
        assert_eq!(endpoint.url().as_deref(), Some("http://localhost:4321/"));
        assert!(logs.contains(&"starting".to_string()));
        assert!(logs.contains(&"done".to_string()), "stderr is pumped too");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pump_stops_on_cancellation() {
        use crate::dev::process::spawn_dev;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let (mut proc, output) = spawn_dev("sleep 30", dir.path(), 4333).unwrap();
        let endpoint = Arc::new(DevEndpoint::new());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump_logs(output, endpoint, tx, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), pump)
            .await
            .expect("pump exits promptly on cancel")
            .unwrap();

        proc.shutdown().await.unwrap();
    }
}
