// src/core/rfid/mod.rs

//! RFID input adapter: reads a Linux event device that presents as a
//! keyboard, assembles keystrokes into scans, and falls back to a
//! simulation mode when no hardware is present or reachable.
//!
//! The non-blocking read path reuses the teacher's own pattern for driving
//! a raw file descriptor from async code (`nix::fcntl` non-blocking setup +
//! `tokio::io::unix::AsyncFd::readable()` + `try_io`), generalized here from
//! a PTY fd to a `/dev/input/eventN` fd. Device auto-detection (VID/PID
//! match, then generic keyboard-capability probe) and the read/debounce/
//! dedup loop follow `services/rfid_service.py` in the original
//! implementation.

use crate::config::RfidConfig;
use crate::core::events::{DomainEvent, EventBus};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::sync::broadcast;
use tracing::{info, warn};

const EV_KEY: u16 = 0x01;
const KEY_ENTER: u16 = 28;
const KEY_KPENTER: u16 = 96;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// One assembled RFID scan, ready for the auth manager.
#[derive(Debug, Clone)]
pub struct RfidScanned {
    pub uid: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Mirrors the layout of Linux's `struct input_event` on a 64-bit host
/// (`linux/input.h`): a timeval followed by type/code/value.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct InputEvent {
    tv_sec: i64,
    tv_usec: i64,
    kind: u16,
    code: u16,
    value: i32,
}

impl InputEvent {
    const SIZE: usize = std::mem::size_of::<Self>();

    fn from_bytes(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), Self::SIZE);
        let mut tv_sec = [0u8; 8];
        let mut tv_usec = [0u8; 8];
        let mut kind = [0u8; 2];
        let mut code = [0u8; 2];
        let mut value = [0u8; 4];
        tv_sec.copy_from_slice(&buf[0..8]);
        tv_usec.copy_from_slice(&buf[8..16]);
        kind.copy_from_slice(&buf[16..18]);
        code.copy_from_slice(&buf[18..20]);
        value.copy_from_slice(&buf[20..24]);
        Self {
            tv_sec: i64::from_ne_bytes(tv_sec),
            tv_usec: i64::from_ne_bytes(tv_usec),
            kind: u16::from_ne_bytes(kind),
            code: u16::from_ne_bytes(code),
            value: i32::from_ne_bytes(value),
        }
    }
}

/// Maps evdev `KEY_*` codes for digits, hex letters, and a handful of
/// punctuation characters seen on 13.56MHz card readers to the character
/// they represent. Extending this table is the only thing needed to
/// support a reader with a different keymap.
fn key_map() -> &'static HashMap<u16, char> {
    use std::sync::OnceLock;
    static MAP: OnceLock<HashMap<u16, char>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        let digit_codes = [2, 3, 4, 5, 6, 7, 8, 9, 10, 11]; // KEY_1..KEY_9, KEY_0
        let digit_chars = ['1', '2', '3', '4', '5', '6', '7', '8', '9', '0'];
        for (code, ch) in digit_codes.into_iter().zip(digit_chars) {
            m.insert(code, ch);
        }
        let letter_codes: [(u16, char); 26] = [
            (30, 'A'), (48, 'B'), (46, 'C'), (32, 'D'), (18, 'E'), (33, 'F'),
            (34, 'G'), (35, 'H'), (23, 'I'), (36, 'J'), (37, 'K'), (38, 'L'),
            (50, 'M'), (49, 'N'), (24, 'O'), (25, 'P'), (16, 'Q'), (19, 'R'),
            (31, 'S'), (20, 'T'), (22, 'U'), (47, 'V'), (17, 'W'), (45, 'X'),
            (21, 'Y'), (44, 'Z'),
        ];
        for (code, ch) in letter_codes {
            m.insert(code, ch);
        }
        m.insert(12, '-'); // KEY_MINUS
        m.insert(57, ' '); // KEY_SPACE
        m.insert(52, '.'); // KEY_DOT
        m.insert(51, ','); // KEY_COMMA
        m.insert(39, ';'); // KEY_SEMICOLON
        m.insert(40, '\''); // KEY_APOSTROPHE
        m
    })
}

struct DeviceFd(OwnedFd);

impl AsRawFd for DeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(nix_to_io)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(nix_to_io)?;
    Ok(())
}

fn nix_to_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

nix::ioctl_write_int!(eviocgrab, b'E', 0x90);
nix::ioctl_read_buf!(eviocgname, b'E', 0x06, u8);
nix::ioctl_read_buf!(eviocgbit_key, b'E', 0x21, u8); // EVIOCGBIT(EV_KEY, len)

/// Attempts to read the human-readable device name via `EVIOCGNAME`.
fn device_name(fd: RawFd) -> Option<String> {
    let mut buf = [0u8; 256];
    let n = unsafe { eviocgname(fd, &mut buf) }.ok()?;
    let n = n.max(0) as usize;
    let end = buf[..n.min(buf.len())].iter().position(|&b| b == 0).unwrap_or(n.min(buf.len()));
    Some(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Whether the device exposes at least the digit keys and an enter-like
/// terminator — the generic fallback heuristic from the original service
/// when VID/PID detection doesn't find the target reader.
fn looks_like_keyboard_scanner(fd: RawFd) -> bool {
    let mut bits = [0u8; 96]; // covers KEY_MAX for our purposes
    if unsafe { eviocgbit_key(fd, &mut bits) }.is_err() {
        return false;
    }
    let has_bit = |code: u16| {
        let byte = (code / 8) as usize;
        let bit = code % 8;
        bits.get(byte).map(|b| b & (1 << bit) != 0).unwrap_or(false)
    };
    let has_digits = (2..=11).any(has_bit);
    let has_enter = has_bit(KEY_ENTER) || has_bit(KEY_KPENTER);
    has_digits && has_enter
}

/// Reads `/sys/class/input/<name>/device/id/{vendor,product}` for a given
/// `/dev/input/eventN` path, if the sysfs mirror exists.
fn vid_pid_of(event_path: &Path) -> Option<(String, String)> {
    let name = event_path.file_name()?.to_str()?;
    let base = PathBuf::from("/sys/class/input").join(name).join("device");
    let vendor = fs::read_to_string(base.join("id/vendor")).ok()?;
    let product = fs::read_to_string(base.join("id/product")).ok()?;
    Some((vendor.trim().to_lowercase(), product.trim().to_lowercase()))
}

fn list_event_devices() -> Vec<PathBuf> {
    let dir = match fs::read_dir("/dev/input") {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };
    let mut paths: Vec<PathBuf> = dir
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("event"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

/// Reports whether a usable reader can be found, without starting the read
/// loop. Used by the operator's hardware self-check entry point: returns
/// `Ok(description)` if a device was found or simulation mode is enabled,
/// `Err(reason)` otherwise.
pub fn self_check(config: &RfidConfig) -> Result<String, String> {
    if let Some(path) = detect_device(config) {
        return Ok(format!("RFID device detected at {path:?}"));
    }
    if config.simulation_mode {
        return Ok("no RFID device detected, but simulation mode is enabled".to_string());
    }
    Err("no RFID device detected and simulation mode is disabled".to_string())
}

/// Picks a device path per the detection priority order: configured path,
/// then VID/PID match, then the generic keyboard-scanner heuristic.
fn detect_device(config: &RfidConfig) -> Option<PathBuf> {
    if let Some(configured) = &config.device_path {
        return Some(PathBuf::from(configured));
    }
    let candidates = list_event_devices();

    for path in &candidates {
        if let Some((vendor, product)) = vid_pid_of(path)
            && vendor == config.target_vid.to_lowercase()
            && product == config.target_pid.to_lowercase()
        {
            info!("found RFID reader by VID:PID at {path:?}");
            return Some(path.clone());
        }
    }

    for path in &candidates {
        if let Ok(file) = File::open(path)
            && looks_like_keyboard_scanner(file.as_raw_fd())
        {
            info!("found a generic keyboard-class scan device at {path:?}");
            return Some(path.clone());
        }
    }
    None
}

/// Reads a Linux input device, assembling keystrokes into scans, and falls
/// back to a simulation channel when no hardware is reachable. Exposes a
/// single-consumer broadcast of [`RfidScanned`] events; `simulate` injects a
/// scan indistinguishable in shape from a real read.
pub struct RfidAdapter {
    tx: broadcast::Sender<RfidScanned>,
    inject_tx: mpsc::UnboundedSender<String>,
}

impl RfidAdapter {
    pub fn spawn(config: RfidConfig, events: EventBus, mut shutdown_rx: broadcast::Receiver<()>) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<String>();

        let task_tx = tx.clone();
        let task_config = config.clone();
        let task_events = events.clone();

        tokio::spawn(async move {
            let mut delay = Duration::from_secs(1);
            let mut simulation_mode = task_config.simulation_mode;

            loop {
                if !simulation_mode {
                    match detect_device(&task_config) {
                        Some(path) => match run_hardware_loop(
                            &path,
                            &task_config,
                            &task_tx,
                            &mut inject_rx,
                            &mut shutdown_rx,
                        )
                        .await
                        {
                            LoopExit::Shutdown => break,
                            LoopExit::DeviceLost(reason) => {
                                warn!("RFID device lost: {reason}");
                                task_events.publish(DomainEvent::RfidDeviceLost {
                                    reason: reason.clone(),
                                    at: chrono::Utc::now(),
                                });
                                tokio::time::sleep(delay).await;
                                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                                continue;
                            }
                        },
                        None => {
                            warn!("no RFID device detected, falling back to simulation mode");
                            simulation_mode = true;
                        }
                    }
                } else if let LoopExit::Shutdown =
                    run_simulation_loop(&task_tx, &mut inject_rx, &mut shutdown_rx).await
                {
                    break;
                }
            }
        });

        Self { tx, inject_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RfidScanned> {
        self.tx.subscribe()
    }

    /// Injects a scan identical in shape to a real hardware read.
    pub fn simulate(&self, uid: impl Into<String>) {
        let _ = self.inject_tx.send(uid.into());
    }
}

enum LoopExit {
    Shutdown,
    DeviceLost(String),
}

struct ScanAssembler {
    buffer: String,
    dedup_window: Duration,
    last_emitted: Option<(String, tokio::time::Instant)>,
}

impl ScanAssembler {
    fn new(dedup_window: Duration) -> Self {
        Self {
            buffer: String::new(),
            dedup_window,
            last_emitted: None,
        }
    }

    fn push_char(&mut self, c: char) {
        self.buffer.push(c);
    }

    /// Finalizes the buffer (on terminator or debounce timeout), returning
    /// the scan unless it's a duplicate of the immediately preceding scan
    /// within the dedup window.
    fn finalize(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let uid = std::mem::take(&mut self.buffer);
        let now = tokio::time::Instant::now();
        if let Some((last_uid, at)) = &self.last_emitted
            && last_uid == &uid
            && now.duration_since(*at) < self.dedup_window
        {
            return None;
        }
        self.last_emitted = Some((uid.clone(), now));
        Some(uid)
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

async fn run_hardware_loop(
    path: &Path,
    config: &RfidConfig,
    tx: &broadcast::Sender<RfidScanned>,
    inject_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> LoopExit {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => return LoopExit::DeviceLost(format!("failed to open {path:?}: {e}")),
    };
    let raw_fd = file.as_raw_fd();
    if let Err(e) = set_nonblocking(raw_fd) {
        return LoopExit::DeviceLost(format!("failed to set non-blocking mode: {e}"));
    }

    let grabbed = unsafe { eviocgrab(raw_fd, 1) }.is_ok();
    if grabbed {
        info!("grabbed exclusive access to RFID device at {path:?}");
    } else {
        warn!("could not grab exclusive access to RFID device at {path:?}");
    }

    let owned: OwnedFd = file.into();
    let async_fd = match AsyncFd::new(DeviceFd(owned)) {
        Ok(a) => a,
        Err(e) => return LoopExit::DeviceLost(format!("failed to register async fd: {e}")),
    };

    let debounce = Duration::from_millis(config.debounce_ms.max(1));
    let dedup = Duration::from_millis(config.dedup_window_ms);
    let mut assembler = ScanAssembler::new(dedup);
    let mut raw_buf = [0u8; InputEvent::SIZE];
    let mut silence_deadline = tokio::time::Instant::now() + debounce;

    let exit = loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break LoopExit::Shutdown,
            Some(uid) = inject_rx.recv() => {
                let _ = tx.send(RfidScanned { uid, at: chrono::Utc::now() });
            }
            _ = tokio::time::sleep_until(silence_deadline) => {
                if let Some(uid) = assembler.finalize() {
                    let _ = tx.send(RfidScanned { uid, at: chrono::Utc::now() });
                }
                silence_deadline = tokio::time::Instant::now() + debounce;
            }
            result = read_event(&async_fd, &mut raw_buf) => {
                match result {
                    Ok(event) => {
                        silence_deadline = tokio::time::Instant::now() + debounce;
                        if event.kind == EV_KEY && event.value == 1 {
                            if event.code == KEY_ENTER || event.code == KEY_KPENTER {
                                if let Some(uid) = assembler.finalize() {
                                    let _ = tx.send(RfidScanned { uid, at: chrono::Utc::now() });
                                }
                            } else if let Some(&ch) = key_map().get(&event.code) {
                                assembler.push_char(ch);
                            }
                        }
                    }
                    Err(e) => {
                        assembler.clear();
                        break LoopExit::DeviceLost(format!("read error on {path:?}: {e}"));
                    }
                }
            }
        }
    };

    if grabbed {
        let _ = unsafe { eviocgrab(raw_fd, 0) };
    }
    exit
}

async fn read_event(async_fd: &AsyncFd<DeviceFd>, buf: &mut [u8]) -> io::Result<InputEvent> {
    loop {
        let mut guard = async_fd.readable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::read(inner.as_raw_fd(), buf).map_err(nix_to_io)?;
            if n < InputEvent::SIZE {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short input_event read"));
            }
            Ok(InputEvent::from_bytes(&buf[..InputEvent::SIZE]))
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

async fn run_simulation_loop(
    tx: &broadcast::Sender<RfidScanned>,
    inject_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> LoopExit {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return LoopExit::Shutdown,
            Some(uid) = inject_rx.recv() => {
                let _ = tx.send(RfidScanned { uid, at: chrono::Utc::now() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_suppresses_duplicate_scans_within_window() {
        let mut assembler = ScanAssembler::new(Duration::from_secs(5));
        assembler.push_char('A');
        assembler.push_char('B');
        assert_eq!(assembler.finalize().as_deref(), Some("AB"));

        assembler.push_char('A');
        assembler.push_char('B');
        assert_eq!(assembler.finalize(), None);
    }

    #[test]
    fn assembler_reemits_after_dedup_window() {
        let mut assembler = ScanAssembler::new(Duration::from_millis(10));
        assembler.push_char('X');
        assert_eq!(assembler.finalize().as_deref(), Some("X"));
        std::thread::sleep(Duration::from_millis(20));
        assembler.push_char('X');
        assert_eq!(assembler.finalize().as_deref(), Some("X"));
    }

    #[test]
    fn key_map_covers_digits_and_enter_terminator() {
        assert_eq!(key_map().get(&2), Some(&'1'));
        assert_eq!(key_map().get(&11), Some(&'0'));
        assert!(key_map().get(&KEY_ENTER).is_none());
    }
}
