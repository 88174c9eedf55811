// harvest - client/command.rs
//
// Shell command text for each session operation.
//
// A target path is either a file, a directory (read recursively), or a
// directory plus a glob in its last component (`/var/log/nginx/access*.log`).
// Every operation selects files with `find`, so the three shapes share one
// code path. Ordering by age is one `sort` over find's own mtimes, never a
// per-batch `ls`, so it holds however many files match.
//
// All path text is single-quoted; nothing from configuration reaches the
// remote shell unquoted.

use crate::util::constants;
use chrono::{DateTime, Utc};

/// Builds shell command text for one target path.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    /// Prefix privileged commands with non-interactive `sudo -n`.
    pub sudo: bool,
}

impl CommandBuilder {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    /// Decompress-aware dump of every matching file, oldest first.
    ///
    /// With `since`, only files modified at or after that instant are read.
    pub fn read(&self, path: &str, since: Option<DateTime<Utc>>) -> String {
        format!(
            "{} | while IFS= read -r f; do {}zcat -f -- \"$f\"; done",
            self.oldest_first(path, since),
            self.sudo_prefix(),
        )
    }

    /// Follow matching files across rotation. Never ends on its own.
    pub fn tailf(&self, path: &str) -> String {
        format!(
            "{} -print0 | xargs -0 -r {}tail -q -F --",
            self.find(path, None),
            self.sudo_prefix(),
        )
    }

    /// List matching file paths, oldest first.
    pub fn ls(&self, path: &str, since: Option<DateTime<Utc>>) -> String {
        self.oldest_first(path, since)
    }

    /// The last lines of the most recently modified matching file.
    pub fn random_one(&self, path: &str) -> String {
        format!(
            "{} | tail -n 1 | while IFS= read -r f; do {}zcat -f -- \"$f\" | tail -n {}; done",
            self.oldest_first(path, None),
            self.sudo_prefix(),
            constants::SAMPLE_LINES,
        )
    }

    /// Raw bytes of one remote file.
    pub fn cat(&self, file: &str) -> String {
        format!("{}cat -- {}", self.sudo_prefix(), shell_quote(file))
    }

    fn find(&self, path: &str, since: Option<DateTime<Utc>>) -> String {
        let mut cmd = match split_glob(path) {
            Some((dir, pattern)) => format!(
                "{}find {} -maxdepth 1 -type f -name {}",
                self.sudo_prefix(),
                shell_quote(dir),
                shell_quote(pattern)
            ),
            None => format!("{}find {} -type f", self.sudo_prefix(), shell_quote(path)),
        };
        if let Some(since) = since {
            cmd.push_str(&format!(" -newermt '@{}'", since.timestamp()));
        }
        cmd
    }

    /// Matching paths, one per line, least recently modified first.
    fn oldest_first(&self, path: &str, since: Option<DateTime<Utc>>) -> String {
        format!(
            "{} -printf '%T@ %p\\0' | sort -z -n | cut -z -d ' ' -f 2- | tr '\\0' '\\n'",
            self.find(path, since)
        )
    }

    fn sudo_prefix(&self) -> &'static str {
        if self.sudo {
            "sudo -n "
        } else {
            ""
        }
    }
}

/// Split `path` into `(directory, pattern)` when its last component is a glob.
pub fn split_glob(path: &str) -> Option<(&str, &str)> {
    let (dir, name) = match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (".", path),
    };
    if name.contains(['*', '?', '[']) {
        Some((dir, name))
    } else {
        None
    }
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_split_glob() {
        assert_eq!(
            split_glob("/var/log/nginx/access*.log"),
            Some(("/var/log/nginx", "access*.log"))
        );
        assert_eq!(split_glob("/app?.log"), Some(("/", "app?.log")));
        assert_eq!(split_glob("*.log"), Some((".", "*.log")));
        assert_eq!(split_glob("/var/log/syslog"), None);
        // Globs are only honoured in the last component.
        assert_eq!(split_glob("/var/*/syslog"), None);
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/var/log/a b"), "'/var/log/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_read_plain_path() {
        let cmd = CommandBuilder::new(false).read("/var/log/syslog", None);
        assert!(cmd.starts_with(
            "find '/var/log/syslog' -type f -printf '%T@ %p\\0' | sort -z -n | cut -z -d ' ' -f 2- | tr '\\0' '\\n' | "
        ));
        assert!(cmd.contains("zcat -f -- \"$f\""));
        assert!(!cmd.contains("sudo"));
    }

    #[test]
    fn test_read_glob_with_since() {
        let since = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 22).unwrap();
        let cmd = CommandBuilder::new(false).read("/var/log/app-*.log", Some(since));
        assert!(cmd.contains("find '/var/log' -maxdepth 1 -type f -name 'app-*.log'"));
        assert!(cmd.contains("-newermt '@1705329022'"));
    }

    #[test]
    fn test_sudo_prefixes_every_file_access() {
        let b = CommandBuilder::new(true);
        let read = b.read("/var/log/secure", None);
        assert_eq!(read.matches("sudo -n ").count(), 2);
        assert!(b.tailf("/var/log/secure").contains("sudo -n tail -q -F"));
        assert_eq!(b.cat("/var/log/secure"), "sudo -n cat -- '/var/log/secure'");
    }

    #[test]
    fn test_random_one_samples_newest_file() {
        let cmd = CommandBuilder::new(false).random_one("/var/log/syslog");
        assert!(cmd.contains("sort -z -n"));
        assert!(cmd.contains("| tail -n 1 |"));
        assert!(cmd.ends_with(&format!("tail -n {}; done", constants::SAMPLE_LINES)));
    }

    #[cfg(unix)]
    #[test]
    fn test_read_runs_locally_oldest_first() {
        use std::process::Command;
        use std::time::{Duration, SystemTime};

        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("app-1.log");
        let new = dir.path().join("app-2.log");
        std::fs::write(&old, "old line\n").unwrap();
        std::fs::write(&new, "new line\n").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let pattern = format!("{}/app-*.log", dir.path().display());
        let cmd = CommandBuilder::new(false).read(&pattern, None);
        let out = Command::new("sh").arg("-c").arg(&cmd).output().unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "old line\nnew line\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_ls_orders_by_age_not_name() {
        use std::process::Command;
        use std::time::{Duration, SystemTime};

        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        // Names sort the opposite way to ages; one name carries a space.
        for (name, age) in [("a.log", 10), ("b c.log", 300), ("c.log", 3600)] {
            let path = dir.path().join(name);
            std::fs::write(&path, "x\n").unwrap();
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(now - Duration::from_secs(age))
                .unwrap();
        }

        let cmd = CommandBuilder::new(false).ls(&dir.path().to_string_lossy(), None);
        let out = Command::new("sh").arg("-c").arg(&cmd).output().unwrap();
        assert!(out.status.success());
        let listed: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.rsplit('/').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(listed, vec!["c.log", "b c.log", "a.log"]);
    }
}
