/// mpv-backed [`AudioEngine`] over the JSON IPC socket.
///
/// ```text
///   MpvEngine::spawn()
///         │
///         ├── writer_task   ← PendingRequest via mpsc, serialised → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── reply (has request_id) → matching oneshot
///                                └── start-file / idle-active → EngineEvent broadcast
/// ```
///
/// mpv's playlist is the queue.  mpv only knows urls, so the engine keeps a
/// mirror of the playlist holding our composite ids next to mpv's own
/// `playlist_entry_id`.  Track changes are reported from `start-file`
/// (which carries the entry id), so inserting or removing entries around the
/// playing one never produces a spurious change.
///
/// Needs mpv 0.38+ for `loadfile … insert-at`.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use super::{AudioEngine, EngineEvent, RepeatMode};
use crate::error::EngineError;
use crate::queue::QueueItem;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const OBS_IDLE_ACTIVE: u64 = 1;
const IPC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, EngineError>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line, '\n' included
    reply: oneshot::Sender<Result<Value, EngineError>>,
}

#[derive(Debug, Clone)]
struct MirrorEntry {
    entry_id: Option<i64>,
    item: QueueItem,
}

/// Playlist mirror plus the "has anything started since the last reset" flag
/// the reader needs to tell a finished queue from an explicit stop.
#[derive(Default)]
struct Shared {
    mirror: StdMutex<Vec<MirrorEntry>>,
    started: AtomicBool,
}

impl Shared {
    fn id_for_entry(&self, entry_id: i64) -> Option<String> {
        let mirror = self.mirror.lock().ok()?;
        mirror
            .iter()
            .find(|e| e.entry_id == Some(entry_id))
            .map(|e| e.item.id.clone())
    }

    fn with_mirror<T>(&self, f: impl FnOnce(&mut Vec<MirrorEntry>) -> T) -> Result<T, EngineError> {
        let mut mirror = self
            .mirror
            .lock()
            .map_err(|_| EngineError::Unavailable("playlist mirror poisoned".into()))?;
        Ok(f(&mut mirror))
    }
}

pub struct MpvEngine {
    tx: mpsc::Sender<PendingRequest>,
    shared: Arc<Shared>,
    events: broadcast::Sender<EngineEvent>,
    process: Mutex<Option<tokio::process::Child>>,
}

impl MpvEngine {
    /// Spawn a fresh idle mpv and connect to its IPC socket.
    pub async fn spawn(initial_volume: f32) -> Result<Self, EngineError> {
        let socket_name = tunemap_proto::platform::mpv_socket_name();
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&socket_name).await;

        info!("mpv: spawning new process");
        let mpv_binary = tunemap_proto::platform::find_mpv_binary()
            .ok_or_else(|| EngineError::Unavailable("mpv binary not found".into()))?;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(tunemap_proto::platform::mpv_socket_arg())
            .arg(format!("--volume={}", volume_percent(initial_volume)))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("spawn mpv: {e}")))?;

        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(Shared::default());
        let tx = connect(&socket_name, shared.clone(), events.clone()).await?;

        let engine = Self {
            tx,
            shared,
            events,
            process: Mutex::new(Some(child)),
        };
        engine
            .command(json!(["observe_property", OBS_IDLE_ACTIVE, "idle-active"]))
            .await?;
        Ok(engine)
    }

    /// Kill the mpv process.  The engine is unusable afterwards.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    async fn command(&self, command: Value) -> Result<Value, EngineError> {
        let name = command
            .get(0)
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = json!({ "command": command, "request_id": req_id }).to_string();
        payload.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("mpv writer task gone".into()))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| EngineError::Timeout(name.clone()))?
            .map_err(|_| EngineError::Unavailable("mpv reply channel dropped".into()))?
            .map_err(|e| match e {
                EngineError::Rejected { reason, .. } => EngineError::Rejected {
                    command: name,
                    reason,
                },
                other => other,
            })
    }

    async fn set_property(&self, name: &str, value: Value) -> Result<(), EngineError> {
        self.command(json!(["set_property", name, value])).await?;
        Ok(())
    }

    fn check_index(&self, index: usize, allow_end: bool) -> Result<(), EngineError> {
        let len = self.shared.with_mirror(|m| m.len())?;
        let ok = if allow_end { index <= len } else { index < len };
        if ok {
            Ok(())
        } else {
            Err(EngineError::IndexOutOfRange { index, len })
        }
    }
}

#[async_trait]
impl AudioEngine for MpvEngine {
    async fn reset(&self) -> Result<(), EngineError> {
        self.shared.started.store(false, Ordering::SeqCst);
        self.shared.with_mirror(|m| m.clear())?;
        // `stop` also clears the playlist
        self.command(json!(["stop"])).await?;
        Ok(())
    }

    async fn add(
        &self,
        items: Vec<QueueItem>,
        insert_before: Option<usize>,
    ) -> Result<(), EngineError> {
        if let Some(index) = insert_before {
            self.check_index(index, true)?;
        }
        let mut added = Vec::with_capacity(items.len());
        for (offset, item) in items.into_iter().enumerate() {
            let cmd = match insert_before {
                Some(index) => json!(["loadfile", item.url, "insert-at", index + offset]),
                None => json!(["loadfile", item.url, "append"]),
            };
            let reply = self.command(cmd).await?;
            let entry_id = reply
                .get("data")
                .and_then(|d| d.get("playlist_entry_id"))
                .and_then(Value::as_i64);
            added.push(MirrorEntry { entry_id, item });
        }
        debug!("mpv: added {} entries at {:?}", added.len(), insert_before);
        self.shared.with_mirror(|m| match insert_before {
            Some(index) => {
                let tail = m.split_off(index);
                m.extend(added);
                m.extend(tail);
            }
            None => m.extend(added),
        })
    }

    async fn remove(&self, index: usize) -> Result<(), EngineError> {
        self.check_index(index, false)?;
        self.command(json!(["playlist-remove", index])).await?;
        self.shared.with_mirror(|m| {
            m.remove(index);
        })
    }

    async fn update_item(&self, index: usize, item: QueueItem) -> Result<(), EngineError> {
        self.check_index(index, false)?;
        self.shared.with_mirror(|m| m[index].item = item)
    }

    async fn queue(&self) -> Result<Vec<String>, EngineError> {
        self.shared
            .with_mirror(|m| m.iter().map(|e| e.item.id.clone()).collect())
    }

    async fn skip(&self, index: usize) -> Result<(), EngineError> {
        self.check_index(index, false)?;
        self.command(json!(["playlist-play-index", index])).await?;
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.set_property("pause", json!(false)).await
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.set_property("pause", json!(true)).await
    }

    async fn seek_to(&self, seconds: f64) -> Result<(), EngineError> {
        self.command(json!(["seek", seconds, "absolute"])).await?;
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.set_property("volume", json!(volume_percent(volume))).await
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), EngineError> {
        let (file, playlist) = match mode {
            RepeatMode::Off => ("no", "no"),
            RepeatMode::Track => ("inf", "no"),
            RepeatMode::Queue => ("no", "inf"),
        };
        self.set_property("loop-file", json!(file)).await?;
        self.set_property("loop-playlist", json!(playlist)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

fn volume_percent(volume: f32) -> i64 {
    (volume * 100.0).clamp(0.0, 100.0).round() as i64
}

// ── connection ────────────────────────────────────────────────────────────────

#[cfg(unix)]
async fn connect(
    socket_name: &str,
    shared: Arc<Shared>,
    events: broadcast::Sender<EngineEvent>,
) -> Result<mpsc::Sender<PendingRequest>, EngineError> {
    let socket_path = std::path::PathBuf::from(socket_name);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if socket_path.exists() {
            break;
        }
    }
    let stream = UnixStream::connect(&socket_path)
        .await
        .map_err(|e| EngineError::Unavailable(format!("mpv IPC socket: {e}")))?;
    info!("mpv: connected to IPC socket");
    let (read_half, write_half) = stream.into_split();
    Ok(start_io_tasks(read_half, write_half, shared, events))
}

#[cfg(windows)]
async fn connect(
    socket_name: &str,
    shared: Arc<Shared>,
    events: broadcast::Sender<EngineEvent>,
) -> Result<mpsc::Sender<PendingRequest>, EngineError> {
    let pipe_path = format!(r"\\.\pipe\{}", socket_name);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(&pipe_path) {
            info!("mpv: connected to named pipe");
            let (read_half, write_half) = tokio::io::split(client);
            return Ok(start_io_tasks(read_half, write_half, shared, events));
        }
    }
    Err(EngineError::Unavailable("mpv named pipe did not appear".into()))
}

fn start_io_tasks<R, W>(
    read_half: R,
    write_half: W,
    shared: Arc<Shared>,
    events: broadcast::Sender<EngineEvent>,
) -> mpsc::Sender<PendingRequest>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, shared, events));
    cmd_tx
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    shared: Arc<Shared>,
    events: broadcast::Sender<EngineEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let closed_reason = match reader.read_line(&mut line).await {
            Ok(0) => Some("mpv IPC connection closed".to_string()),
            Ok(_) => None,
            Err(e) => Some(format!("mpv IPC read error: {e}")),
        };
        if let Some(reason) = closed_reason {
            warn!("mpv reader: {}", reason);
            let mut map = pending.lock().await;
            for (_, tx) in map.drain() {
                let _ = tx.send(Err(EngineError::Unavailable(reason.clone())));
            }
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let val: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                continue;
            }
        };

        if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
            let Some(tx) = pending.lock().await.remove(&req_id) else {
                debug!("mpv reader: reply for unknown req={}", req_id);
                continue;
            };
            let result = match val["error"].as_str() {
                Some("success") => Ok(val),
                other => Err(EngineError::Rejected {
                    command: String::new(),
                    reason: other.unwrap_or("unknown error").to_string(),
                }),
            };
            let _ = tx.send(result);
            continue;
        }

        if let Some(event) = translate_event(&val, &shared) {
            debug!("mpv reader: {:?}", event);
            let _ = events.send(event);
        }
    }
}

/// Map a raw mpv event onto an [`EngineEvent`], if it is one we report.
fn translate_event(val: &Value, shared: &Shared) -> Option<EngineEvent> {
    match val.get("event")?.as_str()? {
        "start-file" => {
            shared.started.store(true, Ordering::SeqCst);
            let id = val
                .get("playlist_entry_id")
                .and_then(Value::as_i64)
                .and_then(|entry| shared.id_for_entry(entry));
            Some(EngineEvent::TrackChanged { id })
        }
        "property-change" => {
            if val.get("id")?.as_u64()? != OBS_IDLE_ACTIVE {
                return None;
            }
            let idle = val.get("data")?.as_bool()?;
            // idle after a reset is an explicit stop, not a finished queue
            (idle && shared.started.swap(false, Ordering::SeqCst)).then_some(EngineEvent::QueueEnded)
        }
        _ => None,
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(EngineError::Unavailable(format!("mpv write error: {e}"))));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> QueueItem {
        QueueItem {
            id: id.to_string(),
            url: format!("https://p/{id}.mp3"),
            title: id.to_string(),
            artist: String::new(),
            artwork: None,
        }
    }

    fn shared_with(entries: &[(i64, &str)]) -> Shared {
        let shared = Shared::default();
        shared
            .with_mirror(|m| {
                m.extend(entries.iter().map(|(entry_id, id)| MirrorEntry {
                    entry_id: Some(*entry_id),
                    item: item(id),
                }))
            })
            .unwrap();
        shared
    }

    #[test]
    fn test_start_file_maps_entry_id_to_composite_id() {
        let shared = shared_with(&[(4, "1:1"), (9, "1:2")]);
        let evt = translate_event(
            &json!({ "event": "start-file", "playlist_entry_id": 9 }),
            &shared,
        );
        assert_eq!(
            evt,
            Some(EngineEvent::TrackChanged {
                id: Some("1:2".into())
            })
        );
    }

    #[test]
    fn test_idle_reports_queue_end_only_after_playback() {
        let shared = shared_with(&[(1, "1:1")]);
        let idle = json!({ "event": "property-change", "id": OBS_IDLE_ACTIVE, "data": true });
        assert_eq!(translate_event(&idle, &shared), None);

        translate_event(&json!({ "event": "start-file", "playlist_entry_id": 1 }), &shared);
        assert_eq!(translate_event(&idle, &shared), Some(EngineEvent::QueueEnded));
        // only once per run
        assert_eq!(translate_event(&idle, &shared), None);
    }

    #[tokio::test]
    async fn test_reader_routes_replies_and_events() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let shared = Arc::new(shared_with(&[(2, "7:3")]));
        let (events, mut rx) = broadcast::channel(8);
        let tx = start_io_tasks(read_half, write_half, shared, events);

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(PendingRequest {
            req_id: 77,
            payload: "{\"command\":[\"stop\"],\"request_id\":77}\n".into(),
            reply: reply_tx,
        })
        .await
        .unwrap();

        let mut buf = vec![0u8; 256];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("\"request_id\":77"));

        server
            .write_all(b"{\"event\":\"start-file\",\"playlist_entry_id\":2}\n{\"request_id\":77,\"error\":\"success\"}\n")
            .await
            .unwrap();

        assert!(reply_rx.await.unwrap().is_ok());
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::TrackChanged {
                id: Some("7:3".into())
            }
        );
    }
}
