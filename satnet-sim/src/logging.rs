//! Per-node simulation event logs.
//!
//! Every node owns one logger writing CSV lines
//! (`logType, timestamp, modelName, message`); the process-level diagnostics
//! go through `tracing` instead. Three handlers are selectable from the
//! configuration: stdout, plain file, and chunk-buffered file. The chunked
//! variant buffers until a configured character count is reached and flushes
//! the remainder when dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use satnet_types::Time;

use crate::error::SimError;

// ── Log levels ────────────────────────────────────────────────────────────────

/// Severity of a log message. A logger configured at level `L` accepts
/// messages at `L` or any more severe level, with `All` accepting everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Logic = 4,
    All = 5,
}

impl LogLevel {
    pub fn from_config(s: &str) -> Result<Self, SimError> {
        match s {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "logic" => Ok(LogLevel::Logic),
            "all" => Ok(LogLevel::All),
            other => Err(SimError::Config(format!("unknown log level `{other}`"))),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LogLevel::Error => "LOGERROR",
            LogLevel::Warn => "LOGWARN",
            LogLevel::Info => "LOGINFO",
            LogLevel::Debug => "LOGDEBUG",
            LogLevel::Logic => "LOGLOGIC",
            LogLevel::All => "LOGALL",
        }
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

const FILE_HEADER: &str = "logType, timestamp, modelName, message\n";

enum Sink {
    /// Print to stdout; used from tests and small interactive runs.
    Cmd { name: String },
    /// One line per write, flushed by the OS.
    File { file: File },
    /// Character-counted chunk buffer appended to the file on overflow.
    Chunked {
        path: PathBuf,
        buf: String,
        max_chunk: usize,
    },
}

/// Append-only event log owned by a single node and shared by its models.
pub struct Logger {
    level: LogLevel,
    sink: Mutex<Sink>,
}

impl Logger {
    pub fn cmd(level: LogLevel, name: &str) -> Logger {
        Logger {
            level,
            sink: Mutex::new(Sink::Cmd {
                name: name.to_string(),
            }),
        }
    }

    pub fn file(level: LogLevel, name: &str, dir: &Path) -> Result<Logger, SimError> {
        let path = Self::create_log_file(name, dir)?;
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| SimError::Resource(format!("couldn't open log file {path:?}: {e}")))?;
        Ok(Logger {
            level,
            sink: Mutex::new(Sink::File { file }),
        })
    }

    pub fn chunked(
        level: LogLevel,
        name: &str,
        dir: &Path,
        max_chunk: usize,
    ) -> Result<Logger, SimError> {
        let path = Self::create_log_file(name, dir)?;
        Ok(Logger {
            level,
            sink: Mutex::new(Sink::Chunked {
                path,
                buf: String::new(),
                max_chunk,
            }),
        })
    }

    fn create_log_file(name: &str, dir: &Path) -> Result<PathBuf, SimError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| SimError::Resource(format!("couldn't create log dir {dir:?}: {e}")))?;
        let path = dir.join(format!("Log_{name}.log"));
        let mut file = File::create(&path)
            .map_err(|e| SimError::Resource(format!("couldn't create log file {path:?}: {e}")))?;
        file.write_all(FILE_HEADER.as_bytes())
            .map_err(|e| SimError::Resource(format!("couldn't write log header: {e}")))?;
        Ok(path)
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Write one event. Returns `Ok(true)` when the message passed the level
    /// filter and was accepted by the sink.
    pub fn log(
        &self,
        level: LogLevel,
        timestamp: Option<&Time>,
        model_name: Option<&str>,
        message: &str,
    ) -> Result<bool, SimError> {
        if level > self.level {
            return Ok(false);
        }
        // The message field is double-quoted in the CSV; an embedded quote
        // would corrupt every downstream analyzer.
        if message.contains('"') {
            return Err(SimError::Resource(format!(
                "log message contains a double quote: {message}"
            )));
        }
        let ts = timestamp.map(Time::to_string).unwrap_or_else(|| "NTA".into());
        let model = model_name.unwrap_or("NMA");

        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Cmd { name } => {
                println!("[{}], {}, {}, {}: {}", level.label(), name, ts, model, message);
            }
            Sink::File { file } => {
                let line = format!("[{}], {}, {}, \"{}\"\n", level.label(), ts, model, message);
                file.write_all(line.as_bytes())?;
            }
            Sink::Chunked { path, buf, max_chunk } => {
                use std::fmt::Write as _;
                let _ = write!(buf, "[{}], {}, {}, \"{}\"\n", level.label(), ts, model, message);
                if buf.len() >= *max_chunk {
                    Self::append_chunk(path, buf)?;
                    buf.clear();
                }
            }
        }
        Ok(true)
    }

    fn append_chunk(path: &Path, buf: &str) -> Result<(), SimError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| SimError::Resource(format!("couldn't open log file {path:?}: {e}")))?;
        file.write_all(buf.as_bytes())?;
        Ok(())
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Sink::Chunked { path, buf, .. } = &mut *self.sink.lock() {
            if !buf.is_empty() {
                let _ = Self::append_chunk(path, buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("satnet-logs-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn chunked_logger_buffers_until_limit() {
        let dir = temp_dir("chunk");
        let t = Time::from_str("2022-10-14 12:00:00").unwrap();
        {
            let logger = Logger::chunked(LogLevel::Info, "t_0_GS_1", &dir, 4096).unwrap();
            logger.log(LogLevel::Info, Some(&t), Some("ModelPower"), "hello").unwrap();
            let on_disk = std::fs::read_to_string(dir.join("Log_t_0_GS_1.log")).unwrap();
            assert_eq!(on_disk, FILE_HEADER, "buffered line must not be flushed yet");
        }
        // Dropping the logger flushes the remainder
        let on_disk = std::fs::read_to_string(dir.join("Log_t_0_GS_1.log")).unwrap();
        assert!(on_disk.ends_with("[LOGINFO], 2022-10-14 12:00:00, ModelPower, \"hello\"\n"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn level_filter_accepts_more_severe_messages() {
        let dir = temp_dir("filter");
        let logger = Logger::chunked(LogLevel::Info, "f", &dir, 1).unwrap();
        assert!(logger.log(LogLevel::Error, None, None, "e").unwrap());
        assert!(logger.log(LogLevel::Info, None, None, "i").unwrap());
        assert!(!logger.log(LogLevel::Debug, None, None, "d").unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn double_quote_is_rejected() {
        let dir = temp_dir("quote");
        let logger = Logger::chunked(LogLevel::All, "q", &dir, 64).unwrap();
        assert!(logger.log(LogLevel::Info, None, None, "bad \" quote").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
