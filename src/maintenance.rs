//! Background maintenance scheduling
//!
//! One recurring task per component. The task only holds a weak reference
//! to its component, so it ends by itself once the component is dropped.

use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Stand-in for deadlines too far out to represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating to a far-future instant instead of overflowing
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Component side of a maintenance loop
#[async_trait]
pub(crate) trait Sweep: Send + Sync + 'static {
    /// Sleep before the next sweep; read again on every iteration
    fn interval(&self) -> Duration;

    /// Whether the component no longer needs maintenance
    fn retired(&self) -> bool {
        false
    }

    async fn sweep(&self);
}

/// Handle to a running maintenance task
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to wind down
    pub async fn stop(mut self) {
        self.task.abort();
        // Cancellation is the expected outcome here
        let _ = (&mut self.task).await;
        debug!(task = self.name, "maintenance task stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn<S: Sweep>(name: &'static str, component: Weak<S>) -> MaintenanceHandle {
    let task = tokio::spawn(async move {
        info!(task = name, "starting maintenance task");

        loop {
            let interval = match component.upgrade() {
                Some(component) if !component.retired() => component.interval(),
                _ => break,
            };

            tokio::time::sleep(interval).await;

            let Some(component) = component.upgrade() else {
                break;
            };
            if component.retired() {
                break;
            }
            component.sweep().await;
        }

        debug!(task = name, "maintenance task exiting");
    });

    MaintenanceHandle { name, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Counter {
        sweeps: AtomicUsize,
        retired: AtomicBool,
    }

    #[async_trait]
    impl Sweep for Counter {
        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn retired(&self) -> bool {
            self.retired.load(Ordering::SeqCst)
        }

        async fn sweep(&self) {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            sweeps: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval() {
        let component = counter();
        let handle = spawn("test", Arc::downgrade(&component));

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(component.sweeps.load(Ordering::SeqCst), 3);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_component_dropped() {
        let component = counter();
        let handle = spawn("test", Arc::downgrade(&component));
        drop(component);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
        assert!(deadline_after(now, Duration::MAX) > now + Duration::from_secs(86_400 * 365));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_retired() {
        let component = counter();
        let handle = spawn("test", Arc::downgrade(&component));
        component.retired.store(true, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
        assert_eq!(component.sweeps.load(Ordering::SeqCst), 0);
    }
}
