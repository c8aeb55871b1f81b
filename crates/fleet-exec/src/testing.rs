//! Scripted command runner for tests.
//!
//! Replies are looked up by command string: queued replies first, then the
//! version command (answers with the simulated installed version), then a
//! per-command fallback, then an empty success. Commands registered with
//! [`ScriptedRunner::installs_on`] move the simulated installed version to
//! their `RELEASE_TAG` when they succeed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::command::{
    CommandOutput, CommandRunner, CommandSpec, RELEASE_TAG_ENV, RunFuture,
};
use crate::error::ExecError;

/// Canned result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Exit 0 with this output.
    Ok(String),
    /// Exit 1 with this output.
    Fail(String),
    /// Never finish; ends in `TimedOut` once the command's timeout elapses.
    Hang,
}

impl Reply {
    pub fn ok(output: impl Into<String>) -> Self {
        Reply::Ok(output.into())
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Reply::Fail(output.into())
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<Reply>>,
    fallback: HashMap<String, Reply>,
    version_command: Option<String>,
    installers: HashSet<String>,
    installed: String,
    calls: Vec<CommandSpec>,
}

#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `command`.
    pub fn reply(self, command: &str, reply: Reply) -> Self {
        self.push_reply(command, reply);
        self
    }

    /// Reply used for `command` once its queue is drained.
    pub fn fallback(self, command: &str, reply: Reply) -> Self {
        self.lock()
            .fallback
            .insert(command.to_string(), reply);
        self
    }

    /// Simulated installed version.
    pub fn with_installed(self, version: &str) -> Self {
        self.lock().installed = version.to_string();
        self
    }

    /// Answer `command` with the simulated installed version.
    pub fn version_command(self, command: &str) -> Self {
        self.lock().version_command = Some(command.to_string());
        self
    }

    /// A successful run of `command` installs its `RELEASE_TAG`.
    pub fn installs_on(self, command: &str) -> Self {
        self.lock().installers.insert(command.to_string());
        self
    }

    pub fn push_reply(&self, command: &str, reply: Reply) {
        self.lock()
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn set_fallback(&self, command: &str, reply: Reply) {
        self.lock().fallback.insert(command.to_string(), reply);
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.lock().calls.clone()
    }

    /// Invocations of one command.
    pub fn calls_to(&self, command: &str) -> Vec<CommandSpec> {
        self.lock()
            .calls
            .iter()
            .filter(|spec| spec.command == command)
            .cloned()
            .collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|spec| spec.command == command)
            .count()
    }

    pub fn installed(&self) -> String {
        self.lock().installed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, spec: &CommandSpec) -> Reply {
        let mut script = self.lock();
        script.calls.push(spec.clone());

        if let Some(reply) = script
            .queued
            .get_mut(&spec.command)
            .and_then(VecDeque::pop_front)
        {
            return self.settle(&mut script, spec, reply);
        }
        if script.version_command.as_deref() == Some(spec.command.as_str()) {
            return Reply::Ok(script.installed.clone());
        }
        let reply = script
            .fallback
            .get(&spec.command)
            .cloned()
            .unwrap_or_else(|| Reply::Ok(String::new()));
        self.settle(&mut script, spec, reply)
    }

    fn settle(&self, script: &mut Script, spec: &CommandSpec, reply: Reply) -> Reply {
        if matches!(reply, Reply::Ok(_)) && script.installers.contains(&spec.command) {
            if let Some(tag) = spec.env_var(RELEASE_TAG_ENV) {
                script.installed = tag.to_string();
            }
        }
        reply
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: CommandSpec) -> RunFuture<'_> {
        let reply = self.next_reply(&spec);
        Box::pin(async move {
            match reply {
                Reply::Ok(output) => Ok(CommandOutput {
                    stdout: output.clone(),
                    combined: output,
                }),
                Reply::Fail(output) => Err(ExecError::Failed {
                    command: spec.command,
                    code: Some(1),
                    output,
                }),
                Reply::Hang => match spec.timeout {
                    Some(after) => {
                        tokio::time::sleep(after).await;
                        Err(ExecError::TimedOut {
                            command: spec.command,
                            after,
                        })
                    }
                    None => std::future::pending().await,
                },
            }
        })
    }
}
