//! In-memory fakes for unit tests

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use gb_core::time::current_time_millis;
use gb_core::types::ForwarderHandle;
use gb_core::{ExecutionResult, GbError, Remote, RemoteTarget};

use crate::tunnel::{ForwardRequest, ForwarderLauncher};

/// Scripted remote: each `exec` pops the next queued reply, defaulting to a
/// silent exit 0 once the queue is empty.
pub struct FakeRemote {
    target: RemoteTarget,
    replies: Mutex<VecDeque<Result<ExecutionResult, GbError>>>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            target: RemoteTarget {
                host: "gpu.test".to_string(),
                port: 22,
                user: "tester".to_string(),
                working_dir: "/srv/work".to_string(),
                identity_file: "/dev/null".into(),
                strict_host_key: false,
                connect_timeout: std::time::Duration::from_secs(5),
            },
            replies: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn push_exit(&self, code: i32, stdout: &str, stderr: &str) {
        self.replies.lock().unwrap().push_back(Ok(ExecutionResult {
            exit_code: code,
            stdout_tail: stdout.to_string(),
            stderr_tail: stderr.to_string(),
        }));
    }

    pub fn push_error(&self, err: GbError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    /// Total remote calls of any kind
    pub fn calls(&self) -> usize {
        self.commands.lock().unwrap().len() + self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl Remote for FakeRemote {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    async fn exec(&self, command: &str, _streamed: bool) -> Result<ExecutionResult, GbError> {
        self.commands.lock().unwrap().push(command.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ExecutionResult {
                    exit_code: 0,
                    stdout_tail: String::new(),
                    stderr_tail: String::new(),
                })
            })
    }

    async fn upload(&self, remote_path: &str, contents: Vec<u8>) -> Result<(), GbError> {
        self.uploads
            .lock()
            .unwrap()
            .push((remote_path.to_string(), contents));
        Ok(())
    }
}

/// Launcher that tracks fake pids in memory
#[derive(Default)]
pub struct FakeLauncher {
    next_pid: AtomicU32,
    running: Mutex<HashSet<u32>>,
    stopped: Mutex<Vec<u32>>,
    launched: Mutex<Vec<ForwardRequest>>,
    pub fail_next: AtomicBool,
}

impl FakeLauncher {
    pub fn running(&self) -> HashSet<u32> {
        self.running.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<u32> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn launched(&self) -> Vec<ForwardRequest> {
        self.launched.lock().unwrap().clone()
    }

    /// Simulate the forwarder dying on its own
    pub fn crash(&self, pid: u32) {
        self.running.lock().unwrap().remove(&pid);
    }
}

#[async_trait]
impl ForwarderLauncher for FakeLauncher {
    async fn launch(&self, request: &ForwardRequest) -> Result<ForwarderHandle, GbError> {
        self.launched.lock().unwrap().push(request.clone());
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GbError::transport("authentication rejected"));
        }
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().insert(pid);
        Ok(ForwarderHandle {
            pid,
            started_at: current_time_millis(),
        })
    }

    fn owns(&self, handle: &ForwarderHandle, _local_port: u16) -> bool {
        self.running.lock().unwrap().contains(&handle.pid)
    }

    async fn stop(&self, handle: &ForwarderHandle) -> Result<(), GbError> {
        self.running.lock().unwrap().remove(&handle.pid);
        self.stopped.lock().unwrap().push(handle.pid);
        Ok(())
    }
}
