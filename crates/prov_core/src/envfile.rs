//! `KEY=value` environment file handling.
//!
//! Rewrites target individual keys and leave every other line untouched,
//! comments and blank lines included.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::{CoreError, CoreResult};

/// An env file held as its original lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl EnvFile {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
            trailing_newline: content.is_empty() || content.ends_with('\n'),
        }
    }

    pub fn read(path: &Path) -> CoreResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CoreError::filesystem(path, e))?;
        Ok(Self::parse(&content))
    }

    pub fn write(&self, path: &Path) -> CoreResult<()> {
        std::fs::write(path, self.render()).map_err(|e| CoreError::filesystem(path, e))
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Key defined on a line, if the line is an assignment.
    fn key_of(line: &str) -> Option<&str> {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            return None;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let (key, _) = trimmed.split_once('=')?;
        let key = key.trim_end();
        (!key.is_empty()).then_some(key)
    }

    /// Value of a key, unquoted.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            if Self::key_of(line) != Some(key) {
                return None;
            }
            let (_, value) = line.split_once('=')?;
            Some(unquote(value.trim()))
        })
    }

    /// Replace the line assigning `key`, or append one if none exists.
    ///
    /// Returns `true` when an existing line was replaced.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let rendered = format!("{}={}", key, quote(value));
        match self.lines.iter().position(|l| Self::key_of(l) == Some(key)) {
            Some(index) => {
                self.lines[index] = rendered;
                true
            }
            None => {
                self.lines.push(rendered);
                self.trailing_newline = true;
                false
            }
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Quote a value when it would not survive unquoted.
fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$' | '`'));
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        return inner.to_string();
    }
    value.to_string()
}

/// Name of the timestamped backup for an env file.
pub fn backup_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| ".env".to_string());
    path.with_file_name(format!("{}.backup.{}", name, at.format("%Y%m%d_%H%M%S")))
}

/// Copy `path` to its backup name, adding `.1`, `.2`, ... when that name is
/// taken. An existing backup is never overwritten.
pub fn create_backup(path: &Path, at: DateTime<Local>) -> CoreResult<PathBuf> {
    let mut source = File::open(path).map_err(|e| CoreError::filesystem(path, e))?;
    let permissions = source
        .metadata()
        .map_err(|e| CoreError::filesystem(path, e))?
        .permissions();

    let base = backup_path(path, at);
    let mut candidate = base.clone();
    let mut suffix = 0u32;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut dest) => {
                dest.set_permissions(permissions)
                    .map_err(|e| CoreError::filesystem(&candidate, e))?;
                io::copy(&mut source, &mut dest)
                    .map_err(|e| CoreError::filesystem(&candidate, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                suffix += 1;
                let mut name = base.clone().into_os_string();
                name.push(format!(".{}", suffix));
                candidate = PathBuf::from(name);
            }
            Err(e) => return Err(CoreError::filesystem(&candidate, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TEMPLATE: &str = "\
APP_NAME=Storefront
APP_URL=http://localhost

# Database
DB_CONNECTION=mysql
DB_HOST=127.0.0.1
DB_DATABASE=laravel
DB_USERNAME=root
DB_PASSWORD=
";

    #[test]
    fn test_set_preserves_other_lines() {
        let mut env = EnvFile::parse(TEMPLATE);
        assert!(env.set("APP_URL", "https://shop.example.com"));
        assert!(env.set("DB_DATABASE", "shop_test"));

        let rendered = env.render();
        assert!(rendered.contains("APP_URL=https://shop.example.com\n"));
        assert!(rendered.contains("DB_DATABASE=shop_test\n"));
        assert!(rendered.contains("APP_NAME=Storefront\n"));
        assert!(rendered.contains("\n\n# Database\nDB_CONNECTION=mysql\n"));
        assert_eq!(env.lines().len(), EnvFile::parse(TEMPLATE).lines().len());
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn test_set_matches_exact_key() {
        let mut env = EnvFile::parse("DB_HOST_REPLICA=10.0.0.2\nDB_HOST=127.0.0.1\n");
        env.set("DB_HOST", "localhost");
        assert_eq!(env.render(), "DB_HOST_REPLICA=10.0.0.2\nDB_HOST=localhost\n");
    }

    #[test]
    fn test_commented_key_is_not_rewritten() {
        let mut env = EnvFile::parse("# DB_PASSWORD=old\n");
        assert!(!env.set("DB_PASSWORD", "n3wpassword"));
        assert_eq!(env.render(), "# DB_PASSWORD=old\nDB_PASSWORD=n3wpassword\n");
    }

    #[test]
    fn test_values_are_quoted_when_needed() {
        let mut env = EnvFile::parse(TEMPLATE);
        env.set("DB_PASSWORD", "pa ss#wo\"rd$1");
        assert_eq!(env.get("DB_PASSWORD").unwrap(), "pa ss#wo\"rd$1");
        assert!(env.render().contains("DB_PASSWORD=\"pa ss#wo\\\"rd\\$1\"\n"));

        env.set("DB_USERNAME", "shop");
        assert!(env.render().contains("DB_USERNAME=shop\n"));
    }

    #[test]
    fn test_export_prefix_is_recognised() {
        let env = EnvFile::parse("export APP_URL=http://old\n");
        assert_eq!(env.get("APP_URL").unwrap(), "http://old");
    }

    #[test]
    fn test_backup_path() {
        let at = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let backup = backup_path(Path::new("/srv/shop/.env"), at);
        assert_eq!(backup, PathBuf::from("/srv/shop/.env.backup.20260314_092653"));
    }

    #[test]
    fn test_create_backup_never_overwrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = dir.path().join(".env");
        let at = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();

        std::fs::write(&env, "DB_PASSWORD=original\n").unwrap();
        let first = create_backup(&env, at).unwrap();

        std::fs::write(&env, "DB_PASSWORD=templated\n").unwrap();
        let second = create_backup(&env, at).unwrap();
        let third = create_backup(&env, at).unwrap();

        assert_eq!(first, dir.path().join(".env.backup.20260314_092653"));
        assert_eq!(second, dir.path().join(".env.backup.20260314_092653.1"));
        assert_eq!(third, dir.path().join(".env.backup.20260314_092653.2"));
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "DB_PASSWORD=original\n");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "DB_PASSWORD=templated\n");
    }

    #[test]
    fn test_create_backup_of_missing_file_leaves_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let at = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();

        let err = create_backup(&dir.path().join(".env"), at).unwrap_err();
        assert_eq!(err.kind(), "FilesystemError");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
