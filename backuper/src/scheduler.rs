//! OS scheduler integration.
//!
//! A [`ScheduledTask`] renders the configured schedule into the platform's
//! native form: `schtasks` arguments on Windows, a tagged crontab line
//! everywhere else. Installing replaces any previous task of the same name.

use crate::config::{Period, Schedule};
use crate::utils::{BackupError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

const CRON_TAG_PREFIX: &str = "# backuper:";

/// A periodic `backuper -c <config> -b` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    name: String,
    period: Period,
    hour: u32,
    minute: u32,
    program: PathBuf,
    config: PathBuf,
}

impl ScheduledTask {
    pub fn new(schedule: &Schedule, program: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            name: schedule.task_name().to_string(),
            period: schedule.period(),
            hour: schedule.hour(),
            minute: schedule.minute(),
            program: program.into(),
            config: config.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command the scheduler runs
    pub fn command_line(&self) -> String {
        format!(
            "\"{}\" -c \"{}\" -b",
            self.program.display(),
            self.config.display()
        )
    }

    pub fn schtasks_create_args(&self) -> Vec<String> {
        vec![
            "/create".to_string(),
            "/F".to_string(),
            "/TN".to_string(),
            self.name.clone(),
            "/SC".to_string(),
            self.period.as_str().to_string(),
            "/ST".to_string(),
            format!("{:02}:{:02}", self.hour, self.minute),
            "/TR".to_string(),
            self.command_line(),
        ]
    }

    pub fn schtasks_delete_args(&self) -> Vec<String> {
        vec![
            "/delete".to_string(),
            "/TN".to_string(),
            self.name.clone(),
            "/F".to_string(),
        ]
    }

    pub fn cron_tag(&self) -> String {
        format!("{CRON_TAG_PREFIX}{}", self.name)
    }

    /// The crontab line for this task. One-shot tasks have no cron form.
    pub fn cron_entry(&self) -> Result<String> {
        let (day_of_month, day_of_week) = match self.period {
            Period::Daily => ("*", "*"),
            Period::Weekly => ("*", "0"),
            Period::Monthly => ("1", "*"),
            Period::Once => {
                return Err(BackupError::Scheduler(
                    "period ONCE cannot be expressed as a crontab entry".to_string(),
                ))
            }
        };

        Ok(format!(
            "{} {} {} * {} {} {}",
            self.minute,
            self.hour,
            day_of_month,
            day_of_week,
            self.command_line(),
            self.cron_tag()
        ))
    }

    /// Human-readable form of the platform command `install` would run
    pub fn describe_install(&self) -> Result<String> {
        if cfg!(windows) {
            Ok(format!("schtasks {}", join_args(&self.schtasks_create_args())))
        } else {
            Ok(format!("crontab entry: {}", self.cron_entry()?))
        }
    }

    /// Register the task with the OS scheduler, replacing an existing one
    pub fn install(&self) -> Result<()> {
        if cfg!(windows) {
            run_checked(Command::new("schtasks").args(self.schtasks_create_args()))?;
        } else {
            let entry = self.cron_entry()?;
            let current = read_crontab()?;
            write_crontab(&merge_crontab(&current, &self.cron_tag(), Some(&entry)))?;
        }

        info!(
            "Scheduled task {:?}: {} at {:02}:{:02}",
            self.name, self.period, self.hour, self.minute
        );
        Ok(())
    }

    /// Remove the task from the OS scheduler
    pub fn uninstall(&self) -> Result<()> {
        if cfg!(windows) {
            run_checked(Command::new("schtasks").args(self.schtasks_delete_args()))?;
        } else {
            let current = read_crontab()?;
            let updated = merge_crontab(&current, &self.cron_tag(), None);
            if updated == current {
                return Err(BackupError::Scheduler(format!(
                    "no crontab entry for task {:?}",
                    self.name
                )));
            }
            write_crontab(&updated)?;
        }

        info!("Unscheduled task {:?}", self.name);
        Ok(())
    }
}

/// Replace (or drop, when `entry` is None) the crontab line carrying `tag`
pub fn merge_crontab(current: &str, tag: &str, entry: Option<&str>) -> String {
    let mut lines: Vec<&str> = current
        .lines()
        .filter(|line| !carries_tag(line, tag))
        .collect();

    if let Some(entry) = entry {
        lines.push(entry);
    }

    let mut crontab = lines.join("\n");
    if !crontab.is_empty() {
        crontab.push('\n');
    }
    crontab
}

/// Whether `tag` is the whole last token of `line`
fn carries_tag(line: &str, tag: &str) -> bool {
    line.trim_end()
        .strip_suffix(tag)
        .is_some_and(|rest| rest.is_empty() || rest.ends_with(char::is_whitespace))
}

fn join_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(' ') {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn_error(program: &str, e: std::io::Error) -> BackupError {
    BackupError::Scheduler(format!("cannot run {program}: {e}"))
}

fn run_checked(command: &mut Command) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!("Running {:?}", command);

    let output = command.output().map_err(|e| spawn_error(&program, e))?;
    if !output.status.success() {
        return Err(BackupError::Scheduler(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

fn read_crontab() -> Result<String> {
    let output = Command::new("crontab")
        .arg("-l")
        .output()
        .map_err(|e| spawn_error("crontab", e))?;

    // `crontab -l` fails when the user has no crontab yet
    if !output.status.success() {
        debug!(
            "crontab -l: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn write_crontab(content: &str) -> Result<()> {
    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error("crontab", e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content.as_bytes())
            .map_err(|e| BackupError::Scheduler(format!("cannot write crontab: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| spawn_error("crontab", e))?;
    if !output.status.success() {
        return Err(BackupError::Scheduler(format!(
            "crontab exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Path of the running executable, for the scheduled command line
pub fn current_program() -> Result<PathBuf> {
    std::env::current_exe()
        .map_err(|e| BackupError::Scheduler(format!("cannot locate executable: {e}")))
}

/// Convenience wrapper used by the CLI
pub fn task_for(schedule: &Schedule, config_path: &Path) -> Result<ScheduledTask> {
    Ok(ScheduledTask::new(schedule, current_program()?, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn task(period: Period, hour: u32, minute: u32) -> ScheduledTask {
        let mut config = Configuration::new();
        config.set_schedule(Some(period), Some(hour), Some(minute)).unwrap();
        config.set_task_name("nightly docs").unwrap();
        ScheduledTask::new(
            config.schedule(),
            "/opt/backuper/bin/backuper",
            "/home/ana/backup.toml",
        )
    }

    #[test]
    fn test_schtasks_arguments() {
        let task = task(Period::Weekly, 7, 5);

        assert_eq!(
            task.schtasks_create_args(),
            vec![
                "/create",
                "/F",
                "/TN",
                "nightly docs",
                "/SC",
                "WEEKLY",
                "/ST",
                "07:05",
                "/TR",
                "\"/opt/backuper/bin/backuper\" -c \"/home/ana/backup.toml\" -b",
            ]
        );
        assert_eq!(
            task.schtasks_delete_args(),
            vec!["/delete", "/TN", "nightly docs", "/F"]
        );
    }

    #[test]
    fn test_cron_entries_per_period() {
        let command = "\"/opt/backuper/bin/backuper\" -c \"/home/ana/backup.toml\" -b";

        assert_eq!(
            task(Period::Daily, 3, 0).cron_entry().unwrap(),
            format!("0 3 * * * {command} # backuper:nightly docs")
        );
        assert_eq!(
            task(Period::Weekly, 22, 30).cron_entry().unwrap(),
            format!("30 22 * * 0 {command} # backuper:nightly docs")
        );
        assert_eq!(
            task(Period::Monthly, 1, 15).cron_entry().unwrap(),
            format!("15 1 1 * * {command} # backuper:nightly docs")
        );
    }

    #[test]
    fn test_once_has_no_cron_form() {
        let err = task(Period::Once, 12, 0).cron_entry().unwrap_err();
        assert!(matches!(err, BackupError::Scheduler(_)));
    }

    #[test]
    fn test_merge_crontab_replaces_tagged_line() {
        let current = "MAILTO=ana\n0 1 * * * /usr/bin/other\n0 3 * * * old # backuper:nightly docs\n";

        let merged = merge_crontab(current, "# backuper:nightly docs", Some("5 4 * * * new # backuper:nightly docs"));
        assert_eq!(
            merged,
            "MAILTO=ana\n0 1 * * * /usr/bin/other\n5 4 * * * new # backuper:nightly docs\n"
        );

        let removed = merge_crontab(&merged, "# backuper:nightly docs", None);
        assert_eq!(removed, "MAILTO=ana\n0 1 * * * /usr/bin/other\n");
    }

    #[test]
    fn test_merge_into_empty_crontab() {
        assert_eq!(merge_crontab("", "# backuper:x", Some("0 3 * * * b # backuper:x")), "0 3 * * * b # backuper:x\n");
        assert_eq!(merge_crontab("", "# backuper:x", None), "");
    }

    #[test]
    fn test_tag_must_be_a_whole_token() {
        let current = "0 3 * * * a # backuper:team# backuper:docs\n0 4 * * * b # backuper:docs\n";
        let merged = merge_crontab(current, "# backuper:docs", None);
        assert_eq!(merged, "0 3 * * * a # backuper:team# backuper:docs\n");
    }

    #[test]
    fn test_other_task_names_are_left_alone() {
        let current = "0 3 * * * a # backuper:docs\n0 4 * * * b # backuper:photos\n";
        let merged = merge_crontab(current, "# backuper:photos", None);
        assert_eq!(merged, "0 3 * * * a # backuper:docs\n");
    }
}
