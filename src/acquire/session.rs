//! Shared login for the credentialed backends.
//!
//! Instaloader logs in once and saves its session file. The cookies of that
//! session are then exported as the Netscape `cookies.txt` yt-dlp reads, so
//! both backends act as the same account.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::backend::run_tool;
use crate::config::Settings;
use crate::error::FetchError;

/// Domain every exported cookie is scoped to
const COOKIE_DOMAIN: &str = ".instagram.com";

/// Prints the pickled cookie dict of an instaloader session file as JSON
const DUMP_SESSION_SCRIPT: &str = "import json, pickle, sys
with open(sys.argv[1], 'rb') as f:
    print(json.dumps(pickle.load(f)))";

/// Session refresh failures
#[derive(Debug, Error)]
pub enum SessionError {
    /// A required setting is unset
    #[error("{0} is not configured")]
    Missing(&'static str),
    /// Instaloader rejected the login
    #[error("login failed: {0}")]
    Login(String),
    /// The saved session could not be read back
    #[error("cannot export session: {0}")]
    Export(String),
    /// A tool could not be started
    #[error(transparent)]
    Tool(#[from] FetchError),
    /// The session dump was not a cookie map
    #[error("unreadable session dump: {0}")]
    Decode(#[from] serde_json::Error),
    /// The cookies file could not be written
    #[error("cannot write cookies file: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders cookies in the Netscape format yt-dlp expects
#[must_use]
pub fn netscape_cookies(cookies: &BTreeMap<String, String>) -> String {
    let mut out = String::from("# Netscape HTTP Cookie File\n");
    for (name, value) in cookies {
        out.push_str(&format!("{COOKIE_DOMAIN}\tTRUE\t/\tTRUE\t0\t{name}\t{value}\n"));
    }
    out
}

fn last_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or("no output")
        .to_string()
}

/// One login-and-export run
#[derive(Clone)]
pub struct SessionRefresh {
    instaloader_binary: String,
    python_binary: String,
    username: String,
    password: String,
    session_file: PathBuf,
    cookies_file: PathBuf,
}

impl SessionRefresh {
    /// Reads the credentials and target paths from settings
    ///
    /// # Errors
    ///
    /// [`SessionError::Missing`] names the first unset setting.
    pub fn from_settings(settings: &Settings) -> Result<Self, SessionError> {
        Ok(Self {
            instaloader_binary: settings.instaloader_binary.clone(),
            python_binary: settings.python_binary.clone(),
            username: settings
                .instagram_username
                .clone()
                .ok_or(SessionError::Missing("instagram_username"))?,
            password: settings
                .instagram_password
                .clone()
                .ok_or(SessionError::Missing("instagram_password"))?,
            session_file: settings
                .instaloader_session_path
                .clone()
                .ok_or(SessionError::Missing("instaloader_session_path"))?,
            cookies_file: settings
                .ytdlp_cookies_path
                .clone()
                .ok_or(SessionError::Missing("ytdlp_cookies_path"))?,
        })
    }

    /// Where the yt-dlp cookies are written
    #[must_use]
    pub fn cookies_file(&self) -> &Path {
        &self.cookies_file
    }

    /// Logs in, saves the session and writes the cookies file.
    /// Returns the number of exported cookies.
    ///
    /// # Errors
    ///
    /// Login rejection, an unreadable session, or a failed write.
    pub async fn run(&self) -> Result<usize, SessionError> {
        let workdir = match self.session_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&workdir).await?;
        let session = self.session_file.to_string_lossy().into_owned();

        let login = run_tool(
            &self.instaloader_binary,
            &[
                "--login".to_string(),
                self.username.clone(),
                "--password".to_string(),
                self.password.clone(),
                "--sessionfile".to_string(),
                session.clone(),
            ],
            &workdir,
        )
        .await?;
        if !login.success {
            return Err(SessionError::Login(last_line(login.error_text())));
        }
        info!(username = %self.username, "Instagram session saved");

        let dump = run_tool(
            &self.python_binary,
            &["-c".to_string(), DUMP_SESSION_SCRIPT.to_string(), session],
            &workdir,
        )
        .await?;
        if !dump.success {
            return Err(SessionError::Export(last_line(dump.error_text())));
        }
        let cookies: BTreeMap<String, String> = serde_json::from_str(dump.stdout.trim())?;

        if let Some(dir) = self.cookies_file.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.cookies_file, netscape_cookies(&cookies)).await?;

        Ok(cookies.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netscape_lines() {
        let cookies = BTreeMap::from([
            ("sessionid".to_string(), "abc%3A123".to_string()),
            ("csrftoken".to_string(), "tok".to_string()),
        ]);

        let text = netscape_cookies(&cookies);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "# Netscape HTTP Cookie File");
        assert_eq!(lines[1], ".instagram.com\tTRUE\t/\tTRUE\t0\tcsrftoken\ttok");
        assert_eq!(lines[2], ".instagram.com\tTRUE\t/\tTRUE\t0\tsessionid\tabc%3A123");
        for line in &lines[1..] {
            assert_eq!(line.split('\t').count(), 7);
        }
    }

    #[test]
    fn test_empty_session_gives_header_only() {
        assert_eq!(netscape_cookies(&BTreeMap::new()), "# Netscape HTTP Cookie File\n");
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn refresh(dir: &Path, instaloader: String, python: String) -> SessionRefresh {
        SessionRefresh {
            instaloader_binary: instaloader,
            python_binary: python,
            username: "relay".to_string(),
            password: "secret".to_string(),
            session_file: dir.join("session-relay"),
            cookies_file: dir.join("cookies").join("cookies.txt"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refresh_writes_cookies_file() {
        let dir = tempfile::tempdir().unwrap();
        let instaloader = script(dir.path(), "fake-instaloader", "exit 0");
        let python = script(
            dir.path(),
            "fake-python",
            r#"echo '{"sessionid": "s1", "ds_user_id": "42"}'"#,
        );
        let job = refresh(dir.path(), instaloader, python);

        assert_eq!(job.run().await.unwrap(), 2);
        let written = std::fs::read_to_string(job.cookies_file()).unwrap();
        assert!(written.starts_with("# Netscape HTTP Cookie File\n"));
        assert!(written.contains("\tsessionid\ts1\n"));
        assert!(written.contains("\tds_user_id\t42\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejected_login_leaves_cookies_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let instaloader = script(
            dir.path(),
            "fake-instaloader",
            "echo 'BadCredentialsException: Login error: Wrong password.' >&2; exit 1",
        );
        let python = script(dir.path(), "fake-python", "exit 99");
        let job = refresh(dir.path(), instaloader, python);

        let err = job.run().await.unwrap_err();
        assert!(matches!(err, SessionError::Login(msg) if msg.contains("Wrong password")));
        assert!(!job.cookies_file().exists());
    }
}
