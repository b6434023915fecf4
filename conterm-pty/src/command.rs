//! Description of the child process attached to a session

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Default value exported as `TERM` to the child
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Program, arguments and environment for the session's child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    cwd: Option<PathBuf>,
    term: String,
}

impl CommandSpec {
    /// Run `program` with no arguments
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            term: DEFAULT_TERM.to_string(),
        }
    }

    /// The platform's interactive shell
    ///
    /// On Unix this is `$SHELL` (falling back to `/bin/bash`) started as a
    /// login shell, in `$HOME`. On Windows it is `%COMSPEC%`, falling back to
    /// `cmd.exe`.
    pub fn default_shell() -> Self {
        #[cfg(windows)]
        {
            let shell = std::env::var_os("COMSPEC").unwrap_or_else(|| "cmd.exe".into());
            Self::new(shell)
        }
        #[cfg(not(windows))]
        {
            let shell = std::env::var_os("SHELL")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "/bin/bash".into());
            let mut spec = Self::new(shell).arg("-l");
            spec.cwd = std::env::var_os("HOME").map(PathBuf::from);
            spec
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set an environment variable for the child, on top of the inherited ones
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        let key = key.as_ref().to_os_string();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.as_ref().to_os_string()));
        self
    }

    /// Working directory of the child
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Value exported as `TERM`
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn term_name(&self) -> &str {
        &self.term
    }

    /// Program name for diagnostics
    pub fn display_program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// The child's full environment: inherited variables, then `TERM`, then
    /// explicit overrides. Later entries replace earlier ones with the same key.
    pub fn environment(&self) -> Vec<(OsString, OsString)> {
        let mut merged: Vec<(OsString, OsString)> = std::env::vars_os().collect();
        let overrides = std::iter::once((OsString::from("TERM"), OsString::from(&self.term)))
            .chain(self.env.iter().cloned());
        for (key, value) in overrides {
            merged.retain(|(k, _)| !same_key(k, &key));
            merged.push((key, value));
        }
        merged
    }

    /// Windows command line: program followed by quoted arguments
    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| quote_windows_arg(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self::default_shell()
    }
}

#[cfg(windows)]
fn same_key(a: &OsStr, b: &OsStr) -> bool {
    a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
}

#[cfg(not(windows))]
fn same_key(a: &OsStr, b: &OsStr) -> bool {
    a == b
}

/// Quote one argument following the MSVC runtime parsing rules
fn quote_windows_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}
