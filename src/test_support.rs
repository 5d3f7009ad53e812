//! Test doubles shared across unit and integration tests.
//!
//! Every double is `Clone` and shares its state, so a test can hand one
//! copy to the code under test and keep another for assertions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::command::{CommandError, CommandOutput, CommandRunner, ProcessFuture, ProcessLauncher};
use crate::mirror::{Mirror, MirrorError, MirrorFuture};
use crate::system::{Account, AccountsPort, FilesystemPort, NewAccount, SystemError};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records a single invocation made through a scripted double.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    fn new(program: &str, args: &[OsString]) -> Self {
        Self {
            program: program.to_owned(),
            args: args.to_vec(),
        }
    }

    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

fn output(code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

fn unscripted(program: &str) -> CommandError {
    CommandError::Spawn {
        program: program.to_owned(),
        message: String::from("no scripted response available"),
    }
}

/// Command runner returning pre-seeded outputs in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(output(code, stdout, stderr));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(CommandInvocation::new(program, args));
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| unscripted(program))
    }
}

/// Launcher returning scripted results for captured and attached processes.
///
/// An `attach` with nothing queued never resolves, which models a daemon
/// that keeps running.
#[derive(Clone, Debug, Default)]
pub struct ScriptedLauncher {
    captures: Arc<Mutex<VecDeque<Result<CommandOutput, CommandError>>>>,
    attaches: Arc<Mutex<VecDeque<Result<Option<i32>, CommandError>>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedLauncher {
    /// Creates a launcher with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the output of the next `capture`.
    pub fn push_capture(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.captures).push_back(Ok(output(code, stdout, stderr)));
    }

    /// Queues an error for the next `capture`.
    pub fn push_capture_error(&self, err: CommandError) {
        lock(&self.captures).push_back(Err(err));
    }

    /// Queues the exit code of the next `attach`.
    pub fn push_exit(&self, code: Option<i32>) {
        lock(&self.attaches).push_back(Ok(code));
    }

    /// Queues an error for the next `attach`.
    pub fn push_attach_error(&self, err: CommandError) {
        lock(&self.attaches).push_back(Err(err));
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn capture<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProcessFuture<'a, CommandOutput> {
        lock(&self.invocations).push(CommandInvocation::new(program, args));
        let next = lock(&self.captures).pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Err(unscripted(program))) })
    }

    fn attach<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> ProcessFuture<'a, Option<i32>> {
        lock(&self.invocations).push(CommandInvocation::new(program, args));
        let next = lock(&self.attaches).pop_front();
        Box::pin(async move {
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        })
    }
}

/// Mirror returning scripted pass results and recording each resync flag.
///
/// Once the script is exhausted every pass fails, so a scheduler loop driven
/// by it always terminates.
#[derive(Clone, Debug, Default)]
pub struct ScriptedMirror {
    results: Arc<Mutex<VecDeque<Result<(), MirrorError>>>>,
    passes: Arc<Mutex<Vec<bool>>>,
}

impl ScriptedMirror {
    /// Creates a mirror with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `count` successful passes.
    pub fn push_successes(&self, count: usize) {
        let mut results = lock(&self.results);
        for _ in 0..count {
            results.push_back(Ok(()));
        }
    }

    /// Queues a failed pass.
    pub fn push_failure(&self, err: MirrorError) {
        lock(&self.results).push_back(Err(err));
    }

    /// Resync flag of every pass attempted so far.
    #[must_use]
    pub fn passes(&self) -> Vec<bool> {
        lock(&self.passes).clone()
    }
}

impl Mirror for ScriptedMirror {
    fn run_pass(&self, resync: bool) -> MirrorFuture<'_> {
        lock(&self.passes).push(resync);
        let next = lock(&self.results).pop_front().unwrap_or_else(|| {
            Err(MirrorError::Launch(unscripted("rclone")))
        });
        Box::pin(async move { next })
    }
}

fn rejected(operation: &str, message: impl Into<String>) -> SystemError {
    SystemError::Rejected {
        operation: operation.to_owned(),
        message: message.into(),
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Failure {
    operation: String,
    subject: Option<String>,
    message: String,
}

fn check_failures(failures: &[Failure], operation: &str, subject: &str) -> Result<(), SystemError> {
    match failures.iter().find(|failure| {
        failure.operation == operation
            && failure
                .subject
                .as_deref()
                .is_none_or(|expected| expected == subject)
    }) {
        Some(failure) => Err(rejected(operation, failure.message.clone())),
        None => Ok(()),
    }
}

/// An account held by [`MemoryAccounts`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemoryAccount {
    /// Home directory.
    pub home: Utf8PathBuf,
    /// Primary group.
    pub group: String,
    /// Login shell.
    pub shell: String,
    /// Password, once set.
    pub password: Option<String>,
}

#[derive(Debug, Default)]
struct AccountsState {
    accounts: BTreeMap<String, MemoryAccount>,
    groups: BTreeSet<String>,
    host_keys: bool,
    failures: Vec<Failure>,
    operations: Vec<String>,
}

/// In-memory account database.
///
/// Mirrors the strictness of the busybox tools: creating an existing group
/// or account fails, as does deleting a missing one.
#[derive(Clone, Debug, Default)]
pub struct MemoryAccounts {
    state: Arc<Mutex<AccountsState>>,
}

impl MemoryAccounts {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a group.
    #[must_use]
    pub fn with_group(self, group: &str) -> Self {
        lock(&self.state).groups.insert(group.to_owned());
        self
    }

    /// Seeds an account, creating its group if needed.
    #[must_use]
    pub fn with_account(self, username: &str, home: &str, group: &str) -> Self {
        {
            let mut state = lock(&self.state);
            state.groups.insert(group.to_owned());
            state.accounts.insert(
                username.to_owned(),
                MemoryAccount {
                    home: Utf8PathBuf::from(home),
                    group: group.to_owned(),
                    shell: String::from("/bin/sh"),
                    password: None,
                },
            );
        }
        self
    }

    /// Seeds existing host keys.
    #[must_use]
    pub fn with_host_keys(self) -> Self {
        lock(&self.state).host_keys = true;
        self
    }

    /// Makes every call to `operation` fail.
    pub fn fail(&self, operation: &str, message: &str) {
        lock(&self.state).failures.push(Failure {
            operation: operation.to_owned(),
            subject: None,
            message: message.to_owned(),
        });
    }

    /// Makes `operation` fail for one user or group.
    pub fn fail_for(&self, operation: &str, subject: &str, message: &str) {
        lock(&self.state).failures.push(Failure {
            operation: operation.to_owned(),
            subject: Some(subject.to_owned()),
            message: message.to_owned(),
        });
    }

    /// Account names, sorted.
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        lock(&self.state).accounts.keys().cloned().collect()
    }

    /// Looks up an account.
    #[must_use]
    pub fn account(&self, username: &str) -> Option<MemoryAccount> {
        lock(&self.state).accounts.get(username).cloned()
    }

    /// Group names, sorted.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        lock(&self.state).groups.iter().cloned().collect()
    }

    /// Whether host keys currently exist.
    #[must_use]
    pub fn has_host_keys(&self) -> bool {
        lock(&self.state).host_keys
    }

    /// Every successful or failed call, as `operation subject`.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        lock(&self.state).operations.clone()
    }

    fn begin(&self, operation: &str, subject: &str) -> Result<std::sync::MutexGuard<'_, AccountsState>, SystemError> {
        let mut state = lock(&self.state);
        state.operations.push(format!("{operation} {subject}").trim_end().to_owned());
        check_failures(&state.failures, operation, subject)?;
        Ok(state)
    }
}

impl AccountsPort for MemoryAccounts {
    fn list_accounts(&self) -> Result<Vec<Account>, SystemError> {
        let state = self.begin("list_accounts", "")?;
        Ok(state
            .accounts
            .iter()
            .map(|(username, account)| Account {
                username: username.clone(),
                home: account.home.clone(),
                group: account.group.clone(),
            })
            .collect())
    }

    fn create_group(&self, group: &str) -> Result<(), SystemError> {
        let mut state = self.begin("create_group", group)?;
        if !state.groups.insert(group.to_owned()) {
            return Err(rejected("create_group", format!("group '{group}' in use")));
        }
        Ok(())
    }

    fn delete_group(&self, group: &str) -> Result<(), SystemError> {
        let mut state = self.begin("delete_group", group)?;
        if !state.groups.remove(group) {
            return Err(rejected("delete_group", format!("unknown group {group}")));
        }
        Ok(())
    }

    fn create_account(&self, account: &NewAccount<'_>) -> Result<(), SystemError> {
        let mut state = self.begin("create_account", account.username)?;
        if !state.groups.contains(account.group) {
            return Err(rejected(
                "create_account",
                format!("unknown group {}", account.group),
            ));
        }
        if state.accounts.contains_key(account.username) {
            return Err(rejected(
                "create_account",
                format!("user '{}' in use", account.username),
            ));
        }
        state.accounts.insert(
            account.username.to_owned(),
            MemoryAccount {
                home: account.home.to_path_buf(),
                group: account.group.to_owned(),
                shell: account.shell.to_owned(),
                password: None,
            },
        );
        Ok(())
    }

    fn set_password(&self, username: &str, password: &str) -> Result<(), SystemError> {
        let mut state = self.begin("set_password", username)?;
        let account = state
            .accounts
            .get_mut(username)
            .ok_or_else(|| rejected("set_password", format!("unknown user {username}")))?;
        account.password = Some(password.to_owned());
        Ok(())
    }

    fn delete_account(&self, username: &str) -> Result<(), SystemError> {
        let mut state = self.begin("delete_account", username)?;
        state
            .accounts
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| rejected("delete_account", format!("unknown user {username}")))
    }

    fn generate_host_keys(&self) -> Result<(), SystemError> {
        let mut state = self.begin("generate_host_keys", "")?;
        state.host_keys = true;
        Ok(())
    }

    fn remove_host_keys(&self) -> Result<(), SystemError> {
        let mut state = self.begin("remove_host_keys", "")?;
        state.host_keys = false;
        Ok(())
    }
}

#[derive(Debug)]
struct FilesystemState {
    dirs: BTreeSet<Utf8PathBuf>,
    files: BTreeMap<Utf8PathBuf, String>,
    owners: BTreeMap<Utf8PathBuf, (String, String)>,
    modes: BTreeMap<Utf8PathBuf, u32>,
    failures: Vec<Failure>,
}

impl Default for FilesystemState {
    fn default() -> Self {
        Self {
            dirs: BTreeSet::from([Utf8PathBuf::from("/")]),
            files: BTreeMap::new(),
            owners: BTreeMap::new(),
            modes: BTreeMap::new(),
            failures: Vec::new(),
        }
    }
}

impl FilesystemState {
    fn exists(&self, path: &Utf8Path) -> bool {
        self.dirs.contains(path) || self.files.contains_key(path)
    }

    fn parent_exists(&self, path: &Utf8Path) -> bool {
        path.parent().is_none_or(|parent| self.dirs.contains(parent))
    }
}

/// In-memory filesystem with absolute paths and `/` pre-created.
#[derive(Clone, Debug, Default)]
pub struct MemoryFilesystem {
    state: Arc<Mutex<FilesystemState>>,
}

impl MemoryFilesystem {
    /// Creates a filesystem holding only `/`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file, creating its parent directories.
    #[must_use]
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        {
            let mut state = lock(&self.state);
            let path = Utf8PathBuf::from(path);
            for ancestor in path.ancestors().skip(1) {
                state.dirs.insert(ancestor.to_path_buf());
            }
            state.files.insert(path, contents.to_owned());
        }
        self
    }

    /// Makes every call to `operation` fail.
    pub fn fail(&self, operation: &str, message: &str) {
        lock(&self.state).failures.push(Failure {
            operation: operation.to_owned(),
            subject: None,
            message: message.to_owned(),
        });
    }

    /// Makes `operation` fail for one path.
    pub fn fail_for(&self, operation: &str, path: &str, message: &str) {
        lock(&self.state).failures.push(Failure {
            operation: operation.to_owned(),
            subject: Some(path.to_owned()),
            message: message.to_owned(),
        });
    }

    /// Contents of a file.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state).files.get(Utf8Path::new(path)).cloned()
    }

    /// Whether a directory exists.
    #[must_use]
    pub fn is_dir(&self, path: &str) -> bool {
        lock(&self.state).dirs.contains(Utf8Path::new(path))
    }

    /// Owner and group of a path, if set.
    #[must_use]
    pub fn owner(&self, path: &str) -> Option<(String, String)> {
        lock(&self.state).owners.get(Utf8Path::new(path)).cloned()
    }

    /// Permission bits of a path, if set.
    #[must_use]
    pub fn mode(&self, path: &str) -> Option<u32> {
        lock(&self.state).modes.get(Utf8Path::new(path)).copied()
    }

    fn begin(
        &self,
        operation: &str,
        path: &Utf8Path,
    ) -> Result<std::sync::MutexGuard<'_, FilesystemState>, SystemError> {
        let state = lock(&self.state);
        check_failures(&state.failures, operation, path.as_str())?;
        Ok(state)
    }
}

fn missing(path: &Utf8Path) -> SystemError {
    SystemError::Io {
        path: path.to_path_buf(),
        message: String::from("No such file or directory"),
    }
}

impl FilesystemPort for MemoryFilesystem {
    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), SystemError> {
        let mut state = self.begin("create_dir_all", path)?;
        for ancestor in path.ancestors() {
            if state.files.contains_key(ancestor) {
                return Err(SystemError::Io {
                    path: ancestor.to_path_buf(),
                    message: String::from("Not a directory"),
                });
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn replace_file(&self, path: &Utf8Path, contents: &str) -> Result<(), SystemError> {
        let mut state = self.begin("replace_file", path)?;
        if !state.parent_exists(path) {
            return Err(missing(path));
        }
        state.files.insert(path.to_path_buf(), contents.to_owned());
        Ok(())
    }

    fn append_file(&self, path: &Utf8Path, contents: &str) -> Result<(), SystemError> {
        let mut state = self.begin("append_file", path)?;
        let file = state.files.get_mut(path).ok_or_else(|| missing(path))?;
        file.push_str(contents);
        Ok(())
    }

    fn remove_file(&self, path: &Utf8Path) -> Result<(), SystemError> {
        let mut state = self.begin("remove_file", path)?;
        state.files.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Utf8Path) -> Result<bool, SystemError> {
        let state = self.begin("exists", path)?;
        Ok(state.exists(path))
    }

    fn set_owner(&self, path: &Utf8Path, user: &str, group: &str) -> Result<(), SystemError> {
        let mut state = self.begin("set_owner", path)?;
        if !state.exists(path) {
            return Err(missing(path));
        }
        state
            .owners
            .insert(path.to_path_buf(), (user.to_owned(), group.to_owned()));
        Ok(())
    }

    fn set_mode(&self, path: &Utf8Path, mode: u32) -> Result<(), SystemError> {
        let mut state = self.begin("set_mode", path)?;
        if !state.exists(path) {
            return Err(missing(path));
        }
        state.modes.insert(path.to_path_buf(), mode);
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and clears variables while holding a global mutex.
    ///
    /// `None` values are removed from the environment.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
