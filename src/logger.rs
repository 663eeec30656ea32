use chrono::Local;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::config::Log;
use crate::errors::{RelayError, Result};

/// Log file writer that starts a new file each day and rolls within a
/// day once the current file exceeds `max_size`.
pub struct RollingFileWriter {
    dir: PathBuf,
    base_name: String,
    max_size: u64,
    max_backups: usize,
    state: Mutex<RollState>,
}

struct RollState {
    cur_date: String,
    cur_size: u64,
    file_index: u32,
    file: fs::File,
}

impl RollingFileWriter {
    pub fn new<P: AsRef<Path>>(path: P, max_size_mib: u64, max_backups: usize) -> Result<Self> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_owned();
        let base_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("xrelay")
            .to_owned();
        fs::create_dir_all(&dir)?;

        let cur_date = Local::now().format("%Y-%m-%d").to_string();
        let (file, cur_size) = Self::open(&dir, &base_name, &cur_date, 0)?;

        Ok(Self {
            dir,
            base_name,
            max_size: max_size_mib * 1024 * 1024,
            max_backups,
            state: Mutex::new(RollState {
                cur_date,
                cur_size,
                file_index: 0,
                file,
            }),
        })
    }

    fn file_name(base: &str, date: &str, index: u32) -> String {
        if index == 0 {
            format!("{}.{}.log", base, date)
        } else {
            format!("{}.{}.{}.log", base, date, index)
        }
    }

    fn open(dir: &Path, base: &str, date: &str, index: u32) -> Result<(fs::File, u64)> {
        let path = dir.join(Self::file_name(base, date, index));
        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok((file, size))
    }

    fn rotate(&self, state: &mut RollState) -> std::io::Result<()> {
        let (file, size) =
            Self::open(&self.dir, &self.base_name, &state.cur_date, state.file_index)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        state.file = file;
        state.cur_size = size;
        self.prune();
        Ok(())
    }

    fn prune(&self) {
        let prefix = format!("{}.", self.base_name);
        let mut logs: Vec<PathBuf> = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(&prefix) && n.ends_with(".log"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => return,
        };
        if logs.len() <= self.max_backups {
            return;
        }
        logs.sort();
        let excess = logs.len() - self.max_backups;
        for path in logs.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                eprintln!("failed to prune log file {}: {}", path.display(), e);
            }
        }
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();

        let today = Local::now().format("%Y-%m-%d").to_string();
        if today != state.cur_date {
            state.cur_date = today;
            state.file_index = 0;
            self.rotate(&mut state)?;
        }

        if state.cur_size + buf.len() as u64 > self.max_size {
            state.file_index += 1;
            self.rotate(&mut state)?;
        }

        let n = state.file.write(buf)?;
        state.cur_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.state.lock().unwrap().file.flush()
    }
}

/// Initializes the process-wide logger from the `common.log` settings.
pub fn init(cfg: &Log) -> Result<()> {
    let level = match cfg.level.as_str() {
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} {} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.module_path().unwrap_or("<unnamed>"),
            record.args()
        )
    });

    if cfg.file_path != "stdout" {
        let writer = RollingFileWriter::new(&cfg.file_path, cfg.max_size, cfg.max_backups)?;
        builder.target(env_logger::Target::Pipe(Box::new(writer)));
    }

    builder
        .try_init()
        .map_err(|e| RelayError::Internal {
            message: format!("logger init failed: {}", e),
        })
}
