use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;

/// One access-log record.
#[derive(Debug, Serialize)]
pub struct AccessEntry<'a> {
    pub ip: IpAddr,
    pub method: &'a str,
    pub path: &'a str,
    pub status: u16,
    pub strategy: &'a str,
    pub score: u8,
    pub detected: bool,
    pub us: u64,
    pub ua: &'a str,
}

/// Per-request access logger that writes one JSON line per request.
/// Writes go straight to the `File` so every line is visible immediately.
pub struct AccessLogger {
    writer: Mutex<File>,
}

impl AccessLogger {
    /// Open (or create) the access log file in append mode.
    pub fn new(path: &str) -> std::io::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(file),
        })
    }

    pub fn log(&self, entry: &AccessEntry<'_>) {
        let line = format_line(entry);
        let mut f = self.writer.lock();
        let _ = writeln!(f, "{}", line);
    }
}

fn format_line(entry: &AccessEntry<'_>) -> String {
    let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    let mut value = serde_json::to_value(entry).unwrap_or_default();
    if let Some(map) = value.as_object_mut() {
        map.insert("ts".to_string(), serde_json::Value::String(ts));
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_json() {
        let entry = AccessEntry {
            ip: "192.0.2.1".parse().unwrap(),
            method: "GET",
            path: "/a\"b",
            status: 403,
            strategy: "block",
            score: 95,
            detected: true,
            us: 1200,
            ua: "GPTBot/1.1",
        };
        let parsed: serde_json::Value = serde_json::from_str(&format_line(&entry)).unwrap();
        assert_eq!(parsed["path"], "/a\"b");
        assert_eq!(parsed["status"], 403);
        assert_eq!(parsed["strategy"], "block");
        assert!(parsed["ts"].is_string());
    }

    #[test]
    fn test_writes_to_file() {
        let dir = std::env::temp_dir().join(format!("crawlguard-access-{}", std::process::id()));
        let path = dir.join("access.log");
        let logger = AccessLogger::new(path.to_str().unwrap()).unwrap();
        let entry = AccessEntry {
            ip: "192.0.2.1".parse().unwrap(),
            method: "GET",
            path: "/",
            status: 200,
            strategy: "monitor",
            score: 0,
            detected: false,
            us: 10,
            ua: "",
        };
        logger.log(&entry);
        logger.log(&entry);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }
}
