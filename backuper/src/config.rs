//! Configuration management for the backuper.
//!
//! A [`Configuration`] holds the backup destination, the registered sources
//! with their copy mode, the ignore set and the schedule. It lives in memory
//! and is persisted only when [`Configuration::save`] is called. On disk it is
//! a TOML file with three sections:
//!
//! ```toml
//! [BACKUP]
//! destination = "/home/me/backup"
//! taskname = "zeetoo backup"
//! schedule = "DAILY"
//! starttime = "03:00"
//!
//! [SOURCE]
//! "/home/me/data" = "r"
//! "/home/me/todo.txt" = "f"
//!
//! [IGNORE]
//! paths = ["/home/me/data/cache"]
//! ```

use crate::fs::paths::resolve_path;
use crate::utils::{BackupError, IoResultExt, Result};
use chrono::{NaiveTime, Timelike};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// How a registered source is mirrored into the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceMode {
    /// A single file
    File,
    /// The files directly inside a directory, no descent
    Directory,
    /// A whole directory tree
    RecursiveDirectory,
}

impl SourceMode {
    /// One-letter code used in the configuration file
    pub fn code(self) -> &'static str {
        match self {
            SourceMode::File => "f",
            SourceMode::Directory => "d",
            SourceMode::RecursiveDirectory => "r",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::File => write!(f, "file"),
            SourceMode::Directory => write!(f, "directory"),
            SourceMode::RecursiveDirectory => write!(f, "recursive"),
        }
    }
}

impl FromStr for SourceMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "f" | "file" => Ok(SourceMode::File),
            "d" | "dir" | "directory" => Ok(SourceMode::Directory),
            "r" | "recursive" => Ok(SourceMode::RecursiveDirectory),
            _ => Err(BackupError::InvalidMode(s.to_string())),
        }
    }
}

impl Serialize for SourceMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for SourceMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        code.parse().map_err(de::Error::custom)
    }
}

/// How often the scheduled backup runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    Once,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    /// Upper-case name, as written to the configuration file and handed to schtasks
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Once => "ONCE",
            Period::Daily => "DAILY",
            Period::Weekly => "WEEKLY",
            Period::Monthly => "MONTHLY",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "once" => Ok(Period::Once),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            _ => Err(BackupError::InvalidPeriod(s.to_string())),
        }
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

/// When, how often and under which name the backup is registered with the OS scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    period: Period,
    start: NaiveTime,
    task_name: String,
}

impl Schedule {
    pub fn period(&self) -> Period {
        self.period
    }

    pub fn hour(&self) -> u32 {
        self.start.hour()
    }

    pub fn minute(&self) -> u32 {
        self.start.minute()
    }

    /// Start time formatted as `HH:MM`
    pub fn start_time(&self) -> String {
        self.start.format("%H:%M").to_string()
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule {
            period: Period::default(),
            start: default_start_time(),
            task_name: default_task_name(),
        }
    }
}

/// Registered sources in registration order; a path appears at most once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources {
    entries: Vec<(PathBuf, SourceMode)>,
}

impl Sources {
    /// Register `path`, replacing the mode of an existing entry in place.
    /// Returns the previous mode if there was one.
    pub fn insert(&mut self, path: PathBuf, mode: SourceMode) -> Option<SourceMode> {
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => Some(std::mem::replace(&mut entry.1, mode)),
            None => {
                self.entries.push((path, mode));
                None
            }
        }
    }

    pub fn remove(&mut self, path: &Path) -> Option<SourceMode> {
        let index = self.entries.iter().position(|(p, _)| p == path)?;
        Some(self.entries.remove(index).1)
    }

    pub fn get(&self, path: &Path) -> Option<SourceMode> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, mode)| *mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, SourceMode)> {
        self.entries.iter().map(|(p, mode)| (p.as_path(), *mode))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Sources {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(path, mode)| (path, mode)))
    }
}

impl<'de> Deserialize<'de> for Sources {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SourcesVisitor;

        impl<'de> Visitor<'de> for SourcesVisitor {
            type Value = Sources;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of source paths to modes ('f', 'd' or 'r')")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Sources, A::Error> {
                let mut sources = Sources::default();
                while let Some((path, mode)) = map.next_entry::<PathBuf, SourceMode>()? {
                    sources.insert(path, mode);
                }
                Ok(sources)
            }
        }

        deserializer.deserialize_map(SourcesVisitor)
    }
}

/// Paths excluded from every copy operation, whichever source they fall under
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    paths: BTreeSet<PathBuf>,
}

impl IgnoreSet {
    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.paths.insert(path)
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.paths.remove(path)
    }

    /// Exact membership of an already resolved path
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Membership test for a path found while walking a tree.
    ///
    /// The path is tried as-is first and then in resolved form, so a child
    /// reached through a symlinked directory still matches its registration.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.paths.is_empty() {
            return false;
        }
        if self.paths.contains(path) {
            return true;
        }
        resolve_path(path)
            .map(|resolved| self.paths.contains(&resolved))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// The backup settings aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    destination: PathBuf,
    sources: Sources,
    ignored: IgnoreSet,
    schedule: Schedule,
}

// On-disk layout

#[derive(Serialize, Deserialize)]
struct ConfigFile {
    #[serde(rename = "BACKUP", default)]
    backup: BackupSection,

    #[serde(rename = "SOURCE", default)]
    source: Sources,

    #[serde(rename = "IGNORE", default)]
    ignore: IgnoreSection,
}

#[derive(Serialize, Deserialize)]
struct BackupSection {
    #[serde(default = "default_destination")]
    destination: PathBuf,

    #[serde(default = "default_task_name")]
    taskname: String,

    #[serde(default)]
    schedule: Period,

    #[serde(default = "default_start_time", with = "hh_mm")]
    starttime: NaiveTime,
}

impl Default for BackupSection {
    fn default() -> Self {
        BackupSection {
            destination: default_destination(),
            taskname: default_task_name(),
            schedule: Period::default(),
            starttime: default_start_time(),
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct IgnoreSection {
    #[serde(default)]
    paths: Vec<PathBuf>,
}

mod hh_mm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|e| de::Error::custom(format!("invalid start time {raw:?}: {e}")))
    }
}

// Default values
fn default_destination() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_task_name() -> String {
    "zeetoo backup".to_string()
}

fn default_start_time() -> NaiveTime {
    NaiveTime::from_hms_opt(3, 0, 0).expect("03:00 is a valid time")
}

/// Resolve a user-supplied path, keeping the I/O error's path for context.
fn resolve(path: &Path) -> Result<PathBuf> {
    resolve_path(path).at_path(path)
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            destination: default_destination(),
            sources: Sources::default(),
            ignored: IgnoreSet::default(),
            schedule: Schedule::default(),
        }
    }
}

impl Configuration {
    /// Fresh configuration: destination is the current directory, nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BackupError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).at_path(path)?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            BackupError::ConfigParse { source, .. } => BackupError::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        debug!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a TOML file, replacing its content
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).at_path(path)?;

        debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Parse the on-disk representation. Stored paths are resolved again so
    /// hand-edited entries obey the same canonical form as registered ones.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| BackupError::ConfigParse {
            path: PathBuf::new(),
            source: Box::new(e),
        })?;

        let mut sources = Sources::default();
        for (path, mode) in file.source.iter() {
            sources.insert(resolve(path)?, mode);
        }

        let mut ignored = IgnoreSet::default();
        for path in &file.ignore.paths {
            ignored.insert(resolve(path)?);
        }

        Ok(Configuration {
            destination: resolve(&file.backup.destination)?,
            sources,
            ignored,
            schedule: Schedule {
                period: file.backup.schedule,
                start: file.backup.starttime,
                task_name: file.backup.taskname,
            },
        })
    }

    /// Render the on-disk representation
    pub fn to_toml_string(&self) -> Result<String> {
        let file = ConfigFile {
            backup: BackupSection {
                destination: self.destination.clone(),
                taskname: self.schedule.task_name.clone(),
                schedule: self.schedule.period,
                starttime: self.schedule.start,
            },
            source: self.sources.clone(),
            ignore: IgnoreSection {
                paths: self.ignored.iter().map(Path::to_path_buf).collect(),
            },
        };

        Ok(toml::to_string(&file)?)
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Set the backup destination, creating the directory if needed
    pub fn set_destination(&mut self, path: impl AsRef<Path>) -> Result<&Path> {
        let path = path.as_ref();
        let invalid = |reason: String| BackupError::InvalidDestination {
            path: path.to_path_buf(),
            reason,
        };

        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| invalid(format!("cannot create directory: {e}")))?;
            debug!("Created backup destination directory {}", path.display());
        } else if !path.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }

        self.destination = resolve_path(path).map_err(|e| invalid(e.to_string()))?;
        debug!("Destination set to {}", self.destination.display());
        Ok(&self.destination)
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    /// Sources that take part in a backup: registered and not ignored
    pub fn active_sources(&self) -> impl Iterator<Item = (&Path, SourceMode)> {
        self.sources
            .iter()
            .filter(|(path, _)| !self.ignored.contains(path))
    }

    /// Register a source. A path that does not exist yet is accepted with a warning.
    pub fn add_source(&mut self, path: impl AsRef<Path>, mode: SourceMode) -> Result<PathBuf> {
        let path = path.as_ref();
        let resolved = resolve(path)?;

        if !resolved.exists() {
            warn!("Source doesn't exist: {}", path.display());
        }

        if let Some(previous) = self.sources.insert(resolved.clone(), mode) {
            if previous != mode {
                debug!("Source {} changed mode: {} -> {}", resolved.display(), previous, mode);
            }
        } else {
            debug!("Source registered: {} ({})", resolved.display(), mode);
        }

        Ok(resolved)
    }

    /// Unregister a source. Returns whether an entry was removed.
    pub fn remove_source(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let removed = self.sources.remove(path).is_some()
            || resolve_path(path)
                .map(|resolved| self.sources.remove(&resolved).is_some())
                .unwrap_or(false);

        if removed {
            debug!("Source removed: {}", path.display());
        }
        removed
    }

    pub fn ignored(&self) -> &IgnoreSet {
        &self.ignored
    }

    pub fn add_ignored(&mut self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let resolved = resolve(path)?;

        self.ignored.insert(resolved.clone());
        debug!("Ignored path registered: {}", resolved.display());
        Ok(resolved)
    }

    /// Remove a path from the ignore set. Returns whether an entry was removed.
    pub fn remove_ignored(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let removed = self.ignored.remove(path)
            || resolve_path(path)
                .map(|resolved| self.ignored.remove(&resolved))
                .unwrap_or(false);

        if removed {
            debug!("Ignored path removed: {}", path.display());
        }
        removed
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Update any subset of period, hour and minute; omitted values are kept.
    pub fn set_schedule(
        &mut self,
        period: Option<Period>,
        hour: Option<u32>,
        minute: Option<u32>,
    ) -> Result<()> {
        if let Some(hour) = hour {
            if hour > 23 {
                return Err(BackupError::InvalidTime(format!("hour {hour} is not in 0..=23")));
            }
        }
        if let Some(minute) = minute {
            if minute > 59 {
                return Err(BackupError::InvalidTime(format!("minute {minute} is not in 0..=59")));
            }
        }

        let hour = hour.unwrap_or(self.schedule.start.hour());
        let minute = minute.unwrap_or(self.schedule.start.minute());
        let start = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| BackupError::InvalidTime(format!("{hour:02}:{minute:02}")))?;

        if let Some(period) = period {
            self.schedule.period = period;
        }
        self.schedule.start = start;

        debug!("Schedule set to {} at {}", self.schedule.period, self.schedule.start_time());
        Ok(())
    }

    pub fn set_task_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BackupError::InvalidTaskName(name));
        }
        self.schedule.task_name = name;
        Ok(())
    }
}
