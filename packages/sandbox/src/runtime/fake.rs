// ABOUTME: In-memory sandbox runtime for tests
// ABOUTME: Simulates container lifecycle and a tiny shell so manager behaviour can be tested without Docker

use super::{
    ContainerInfo, ContainerState, ExecOutput, ExecSpec, Result, RuntimeError, SandboxRuntime,
    SandboxSpec,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: SandboxSpec,
    pub running: bool,
    /// Commands executed in this container, in order
    pub history: Vec<String>,
}

/// Records every call and keeps containers in a map keyed by id.
///
/// Exec understands `echo ...`, `exit N`, `sleep SECS` and `pwd`; anything
/// else exits 127.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: AtomicUsize,
    unavailable: AtomicBool,
    conflicts_remaining: AtomicUsize,
    create_delay: Mutex<Option<Duration>>,
    pub create_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    pub exec_calls: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FakeContainer>> {
        self.containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` creates with `Conflict` regardless of state
    pub fn fail_next_creates_with_conflict(&self, count: usize) {
        self.conflicts_remaining.store(count, Ordering::SeqCst);
    }

    /// Widen race windows by sleeping inside create
    pub fn set_create_delay(&self, delay: Duration) {
        *self
            .create_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(delay);
    }

    /// Insert a container that nothing in the store knows about
    pub fn insert_orphan(&self, name: &str, running: bool) -> String {
        let id = self.allocate_id();
        let spec = SandboxSpec {
            image: "orphan".to_string(),
            name: name.to_string(),
            labels: HashMap::new(),
            mounts: Vec::new(),
            working_dir: "/".to_string(),
            command: Vec::new(),
            user: None,
            limits: crate::profile::ResourceLimits {
                memory_bytes: 64 * 1024 * 1024,
                memory_swap_bytes: -1,
                cpu_quota_us: 100_000,
                cpu_period_us: 100_000,
                cpu_shares: 1024,
            },
        };
        self.lock().insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                spec,
                running,
                history: Vec::new(),
            },
        );
        id
    }

    /// Drop a container behind the manager's back
    pub fn vanish(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Stop a container behind the manager's back
    pub fn halt(&self, id: &str) {
        if let Some(container) = self.lock().get_mut(id) {
            container.running = false;
        }
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.lock().get(id).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.lock().len()
    }

    pub fn running_count(&self) -> usize {
        self.lock().values().filter(|c| c.running).count()
    }

    fn allocate_id(&self) -> String {
        format!("fake{:04}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_id(
        containers: &HashMap<String, FakeContainer>,
        id_or_name: &str,
    ) -> Option<String> {
        if containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        containers
            .values()
            .find(|c| c.spec.name == id_or_name)
            .map(|c| c.id.clone())
    }
}

fn run_shell(command: &str, working_dir: &str) -> (i64, String, Option<Duration>) {
    let trimmed = command.trim();
    let (program, rest) = trimmed
        .split_once(char::is_whitespace)
        .map(|(p, r)| (p, r.trim()))
        .unwrap_or((trimmed, ""));

    match program {
        "echo" => (0, format!("{}\n", rest), None),
        "pwd" => (0, format!("{}\n", working_dir), None),
        "exit" => (rest.parse().unwrap_or(0), String::new(), None),
        "sleep" => {
            let secs: f64 = rest.parse().unwrap_or(0.0);
            (0, String::new(), Some(Duration::from_secs_f64(secs.max(0.0))))
        }
        other => (127, format!("bash: {}: command not found\n", other), None),
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn inspect(&self, id_or_name: &str) -> Result<ContainerInfo> {
        self.check_available()?;
        let containers = self.lock();
        let id = Self::resolve_id(&containers, id_or_name)
            .ok_or_else(|| RuntimeError::NotFound(id_or_name.to_string()))?;
        let container = &containers[&id];
        Ok(ContainerInfo {
            id: container.id.clone(),
            name: container.spec.name.clone(),
            state: if container.running {
                ContainerState::Running
            } else {
                ContainerState::Exited
            },
            labels: container.spec.labels.clone(),
        })
    }

    async fn create_container(&self, spec: &SandboxSpec) -> Result<String> {
        self.check_available()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .create_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let forced_conflict = self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced_conflict {
            return Err(RuntimeError::Conflict(format!(
                "name {} is already in use",
                spec.name
            )));
        }

        let mut containers = self.lock();
        if containers.values().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "name {} is already in use",
                spec.name
            )));
        }

        let id = self.allocate_id();
        containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: true,
                history: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.check_available()?;
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.lock();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace_secs: u64) -> Result<()> {
        self.check_available()?;
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.lock();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id_or_name: &str, _force: bool) -> Result<()> {
        self.check_available()?;
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.lock();
        let id = Self::resolve_id(&containers, id_or_name)
            .ok_or_else(|| RuntimeError::NotFound(id_or_name.to_string()))?;
        containers.remove(&id);
        Ok(())
    }

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        self.check_available()?;
        self.exec_calls.fetch_add(1, Ordering::SeqCst);

        let script = spec.command.last().cloned().unwrap_or_default();
        let (exit_code, output, pause) = {
            let mut containers = self.lock();
            let container = containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            if !container.running {
                return Err(RuntimeError::Conflict(format!(
                    "container {} is not running",
                    id
                )));
            }
            container.history.push(script.clone());
            let working_dir = spec
                .working_dir
                .clone()
                .unwrap_or_else(|| container.spec.working_dir.clone());
            run_shell(&script, &working_dir)
        };

        if let Some(pause) = pause {
            tokio::time::sleep(pause).await;
        }

        Ok(ExecOutput {
            exit_code,
            output: output.into_bytes(),
        })
    }
}
