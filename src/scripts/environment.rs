//! Child Process Environment
//!
//! Children never inherit the server's environment. They get a fixed set of
//! locale and Python I/O variables plus a platform-specific `PATH`.

/// Variables every child receives regardless of platform
const BASE_ENVIRONMENT: &[(&str, &str)] = &[
    ("HOME", "/tmp"),
    ("USER", "scriptrunner"),
    ("SHELL", "/bin/false"),
    ("LANG", "C.UTF-8"),
    ("LC_ALL", "C.UTF-8"),
    ("LANGUAGE", "C.UTF-8"),
    ("LC_CTYPE", "C.UTF-8"),
    ("PYTHONIOENCODING", "utf-8"),
    ("PYTHONUNBUFFERED", "1"),
];

const UNIX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const WINDOWS_PATH: &str =
    r"C:\Windows\System32;C:\Windows;C:\Program Files\Python39;C:\Program Files\Python39\Scripts";

/// Minimal environment handed to script interpreters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureEnvironment {
    vars: Vec<(String, String)>,
}

impl SecureEnvironment {
    /// Build the environment for the host platform
    pub fn for_host() -> Self {
        Self::build(host_is_windows())
    }

    /// Build the environment for an explicit platform
    pub fn build(windows: bool) -> Self {
        let mut vars: Vec<(String, String)> = BASE_ENVIRONMENT
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if windows {
            vars.push(("PATH".to_string(), WINDOWS_PATH.to_string()));
            vars.push(("PYTHONLEGACYWINDOWSSTDIO".to_string(), "0".to_string()));
        } else {
            vars.push(("PATH".to_string(), UNIX_PATH.to_string()));
        }

        Self { vars }
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(key, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Directories listed in `PATH`
    pub fn search_path(&self) -> Vec<&str> {
        let separator = if self.get("PYTHONLEGACYWINDOWSSTDIO").is_some() { ';' } else { ':' };
        self.get("PATH")
            .map(|path| path.split(separator).collect())
            .unwrap_or_default()
    }

    /// `KEY=VALUE` strings
    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Replace the environment of `cmd` with this one
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        cmd.env_clear();
        cmd.envs(self.iter());
    }
}

/// Platform check, with the `OS` variable as a fallback signal
pub fn host_is_windows() -> bool {
    cfg!(windows) || os_var_is_windows(std::env::var("OS").ok().as_deref())
}

fn os_var_is_windows(os: Option<&str>) -> bool {
    os.map(|v| v.to_lowercase().contains("windows"))
        .unwrap_or(false)
}
