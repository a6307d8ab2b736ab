//! Hyprland IPC: window queries for the probe, socket2 events for triggers.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{DesktopProbe, DesktopSnapshot};
use crate::display::Rect;
use crate::emit_or_return;
use crate::events::{ControlEvent, EventSender};

const SIGNATURE_ENV: &str = "HYPRLAND_INSTANCE_SIGNATURE";
const REQUEST_TIMEOUT: Duration = Duration::from_millis(200);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn is_available() -> bool {
    env::var_os(SIGNATURE_ENV).is_some()
}

fn socket_candidates(name: &str) -> Result<Vec<PathBuf>> {
    let signature = env::var(SIGNATURE_ENV).with_context(|| format!("{SIGNATURE_ENV} not set"))?;

    let mut bases = Vec::new();
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        bases.push(PathBuf::from(runtime_dir).join("hypr"));
    }
    bases.push(PathBuf::from("/tmp/hypr"));

    Ok(bases
        .into_iter()
        .map(|base| base.join(&signature).join(name))
        .collect())
}

fn request(command: &str) -> Result<String> {
    let mut last_error = None;
    let mut stream = None;
    for candidate in socket_candidates(".socket.sock")? {
        match UnixStream::connect(&candidate) {
            Ok(conn) => {
                stream = Some(conn);
                break;
            }
            Err(err) => last_error = Some((candidate, err)),
        }
    }

    let Some(mut stream) = stream else {
        return Err(match last_error {
            Some((path, err)) => anyhow::Error::new(err).context(format!(
                "failed to connect to hyprland socket at {}",
                path.display()
            )),
            None => anyhow::anyhow!("hyprland socket path resolution failed"),
        });
    };

    exchange(&mut stream, command)
}

/// Send one request and read the reply, never waiting past [`REQUEST_TIMEOUT`].
fn exchange(stream: &mut UnixStream, command: &str) -> Result<String> {
    stream
        .set_read_timeout(Some(REQUEST_TIMEOUT))
        .context("failed to bound the hyprland socket read")?;
    stream
        .set_write_timeout(Some(REQUEST_TIMEOUT))
        .context("failed to bound the hyprland socket write")?;

    stream
        .write_all(command.as_bytes())
        .with_context(|| format!("failed to send {command}"))?;
    // Hyprland answers once it sees EOF; a failed half-close shows up as a
    // timed-out read below.
    if let Err(e) = stream.shutdown(Shutdown::Write) {
        log::debug!("Failed to half-close hyprland socket: {}", e);
    }

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .with_context(|| format!("failed to read {command} response"))?;
    Ok(response)
}

/// Queries Hyprland for the active window, monitors and clients.
pub struct HyprlandProbe;

impl DesktopProbe for HyprlandProbe {
    fn snapshot(&mut self) -> Result<DesktopSnapshot> {
        let active = request("j/activewindow")?;
        let monitors = request("j/monitors")?;
        let clients = request("j/clients")?;
        parse_snapshot(&active, &monitors, &clients)
    }

    fn name(&self) -> &'static str {
        "hyprland"
    }
}

#[derive(Debug, Deserialize)]
struct WorkspaceRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct MonitorPayload {
    id: i64,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    transform: u8,
    #[serde(rename = "activeWorkspace")]
    active_workspace: Option<WorkspaceRef>,
    #[serde(rename = "specialWorkspace")]
    special_workspace: Option<WorkspaceRef>,
}

fn default_scale() -> f64 {
    1.0
}

impl MonitorPayload {
    /// Logical frame: pixel size divided by scale, swapped when rotated.
    fn frame(&self) -> Rect {
        let scale = if self.scale > 0.0 { self.scale } else { 1.0 };
        let (width, height) = if self.transform % 2 == 1 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        Rect::new(self.x, self.y, width / scale, height / scale)
    }
}

/// Older releases report a boolean, newer ones a mode number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Fullscreen {
    Flag(bool),
    Mode(u8),
}

impl Fullscreen {
    fn is_set(&self) -> bool {
        match self {
            Fullscreen::Flag(flag) => *flag,
            Fullscreen::Mode(mode) => *mode != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientPayload {
    #[serde(default = "default_mapped")]
    mapped: bool,
    #[serde(default)]
    hidden: bool,
    at: [f64; 2],
    size: [f64; 2],
    workspace: WorkspaceRef,
    #[serde(default)]
    monitor: i64,
    fullscreen: Option<Fullscreen>,
}

fn default_mapped() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ActiveWindowPayload {
    address: Option<String>,
}

/// Build a snapshot from the three `j/` query responses.
pub fn parse_snapshot(active: &str, monitors: &str, clients: &str) -> Result<DesktopSnapshot> {
    let active: ActiveWindowPayload =
        serde_json::from_str(active.trim()).context("failed to parse active window")?;
    let monitors: Vec<MonitorPayload> =
        serde_json::from_str(monitors.trim()).context("failed to parse monitors")?;
    let clients: Vec<ClientPayload> =
        serde_json::from_str(clients.trim()).context("failed to parse clients")?;

    let desktop_focused = active.address.as_deref().is_none_or(str::is_empty);

    let mut visible_workspaces = HashSet::new();
    let mut frames = HashMap::new();
    for monitor in &monitors {
        frames.insert(monitor.id, monitor.frame());
        if let Some(workspace) = &monitor.active_workspace {
            visible_workspaces.insert(workspace.id);
        }
        if let Some(special) = &monitor.special_workspace {
            if special.id != 0 {
                visible_workspaces.insert(special.id);
            }
        }
    }

    let windows = clients
        .iter()
        .filter(|c| c.mapped && !c.hidden && visible_workspaces.contains(&c.workspace.id))
        .map(|c| {
            let fullscreen = c.fullscreen.as_ref().is_some_and(Fullscreen::is_set);
            match frames.get(&c.monitor) {
                Some(frame) if fullscreen => *frame,
                _ => Rect::new(c.at[0], c.at[1], c.size[0], c.size[1]),
            }
        })
        .collect();

    Ok(DesktopSnapshot {
        desktop_focused,
        windows,
    })
}

/// Map one socket2 line (`EVENT>>DATA`) to a control event.
pub fn parse_event(line: &str) -> Option<ControlEvent> {
    let (name, _) = line.split_once(">>")?;
    match name {
        "workspace" | "workspacev2" | "focusedmon" | "focusedmonv2" | "activespecial"
        | "activespecialv2" => Some(ControlEvent::WorkspaceSwitched),
        "activewindow" | "activewindowv2" | "fullscreen" | "openwindow" | "closewindow"
        | "movewindow" | "movewindowv2" | "changefloatingmode" | "minimized" => {
            Some(ControlEvent::ForegroundChanged)
        }
        "monitoradded" | "monitoraddedv2" | "monitorremoved" | "monitorremovedv2" => {
            Some(ControlEvent::DisplaysChanged)
        }
        _ => None,
    }
}

/// Forward socket2 events until the control loop goes away.
pub async fn listen(events: EventSender) {
    loop {
        match read_events(&events).await {
            Ok(true) => return,
            Ok(false) => log::debug!("Hyprland event socket closed"),
            Err(e) => log::debug!("Hyprland event socket unavailable: {:#}", e),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Returns `Ok(true)` once the receiver is gone.
async fn read_events(events: &EventSender) -> Result<bool> {
    let mut stream = None;
    for candidate in socket_candidates(".socket2.sock")? {
        if let Ok(conn) = tokio::net::UnixStream::connect(&candidate).await {
            log::info!("Listening for Hyprland events on {}", candidate.display());
            stream = Some(conn);
            break;
        }
    }
    let stream = stream.context("no Hyprland event socket")?;

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(event) = parse_event(&line) {
            emit_or_return!(events, event, Ok(true));
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONITORS: &str = r#"[
        {"id":0,"name":"DP-1","x":0,"y":0,"width":2560,"height":1440,"scale":1.25,
         "transform":0,"activeWorkspace":{"id":1,"name":"1"},
         "specialWorkspace":{"id":0,"name":""}},
        {"id":1,"name":"HDMI-A-1","x":2048,"y":0,"width":1920,"height":1080,"scale":1,
         "transform":1,"activeWorkspace":{"id":5,"name":"5"},
         "specialWorkspace":{"id":0,"name":""}}
    ]"#;

    #[test]
    fn test_no_active_window_means_desktop_focused() {
        let snapshot = parse_snapshot("{}", MONITORS, "[]").unwrap();
        assert!(snapshot.desktop_focused);
        assert!(snapshot.windows.is_empty());
    }

    #[test]
    fn test_only_visible_workspaces_count() {
        let clients = r#"[
            {"address":"0x1","mapped":true,"hidden":false,"at":[10,20],"size":[300,200],
             "workspace":{"id":1,"name":"1"},"monitor":0,"fullscreen":0},
            {"address":"0x2","mapped":true,"hidden":false,"at":[0,0],"size":[2048,1152],
             "workspace":{"id":3,"name":"3"},"monitor":0,"fullscreen":0},
            {"address":"0x3","mapped":true,"hidden":true,"at":[0,0],"size":[2048,1152],
             "workspace":{"id":1,"name":"1"},"monitor":0,"fullscreen":0}
        ]"#;
        let snapshot = parse_snapshot(r#"{"address":"0x1"}"#, MONITORS, clients).unwrap();

        assert!(!snapshot.desktop_focused);
        assert_eq!(snapshot.windows, vec![Rect::new(10.0, 20.0, 300.0, 200.0)]);
    }

    #[test]
    fn test_fullscreen_takes_monitor_frame() {
        let clients = r#"[
            {"address":"0x1","at":[100,100],"size":[10,10],
             "workspace":{"id":1,"name":"1"},"monitor":0,"fullscreen":true},
            {"address":"0x2","at":[2100,0],"size":[10,10],
             "workspace":{"id":5,"name":"5"},"monitor":1,"fullscreen":2}
        ]"#;
        let snapshot = parse_snapshot(r#"{"address":"0x1"}"#, MONITORS, clients).unwrap();

        assert_eq!(
            snapshot.windows,
            vec![
                Rect::new(0.0, 0.0, 2048.0, 1152.0),
                // Rotated monitor: width and height swap.
                Rect::new(2048.0, 0.0, 1080.0, 1920.0),
            ]
        );
    }

    #[test]
    fn test_malformed_response_is_error() {
        assert!(parse_snapshot("{}", "not json", "[]").is_err());
    }

    #[test]
    fn test_exchange_reads_reply() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        let replier = std::thread::spawn(move || {
            let mut request = String::new();
            server.read_to_string(&mut request).unwrap();
            server.write_all(b"{\"ok\":true}").unwrap();
            request
        });

        let reply = exchange(&mut client, "j/monitors").unwrap();
        assert_eq!(reply, "{\"ok\":true}");
        assert_eq!(replier.join().unwrap(), "j/monitors");
    }

    #[test]
    fn test_silent_socket_read_times_out() {
        let (mut client, _server) = UnixStream::pair().unwrap();

        let started = std::time::Instant::now();
        assert!(exchange(&mut client, "j/clients").is_err());
        let waited = started.elapsed();
        assert!(waited >= REQUEST_TIMEOUT);
        assert!(waited < REQUEST_TIMEOUT * 10);
    }

    #[test]
    fn test_parse_event() {
        assert_eq!(
            parse_event("workspace>>2"),
            Some(ControlEvent::WorkspaceSwitched)
        );
        assert_eq!(
            parse_event("activewindow>>kitty,~"),
            Some(ControlEvent::ForegroundChanged)
        );
        assert_eq!(
            parse_event("fullscreen>>1"),
            Some(ControlEvent::ForegroundChanged)
        );
        assert_eq!(
            parse_event("monitorremoved>>DP-2"),
            Some(ControlEvent::DisplaysChanged)
        );
        assert_eq!(parse_event("submap>>resize"), None);
        assert_eq!(parse_event("garbage"), None);
    }
}
