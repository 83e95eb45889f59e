// src/system/jobs.rs

//! Background processes started by modules.

use crate::system::executor::{self, Environment, ExecutionError};
use std::path::Path;
use std::process::Child;

/// Background processes started by modules.
pub trait JobPool {
    /// Starts a job; returns its process id, or `None` for a blank command.
    fn spawn(&mut self, command_line: &str, cwd: &Path, env: &Environment) -> Result<Option<u32>, ExecutionError>;
    /// Reaps finished jobs and returns how many were removed.
    fn free(&mut self) -> usize;
    /// Kills every job still running.
    fn terminate(&mut self);
    fn len(&self) -> usize;
}

/// Background child processes, tracked until they exit or are terminated.
#[derive(Debug, Default)]
pub struct ProcessPool {
    jobs: Vec<Child>,
}

impl JobPool for ProcessPool {
    fn spawn(&mut self, command_line: &str, cwd: &Path, env: &Environment) -> Result<Option<u32>, ExecutionError> {
        log::debug!("{}", command_line);
        let Some(child) = executor::spawn_background(command_line, cwd, env)? else {
            return Ok(None);
        };
        let pid = child.id();
        self.jobs.push(child);
        Ok(Some(pid))
    }

    fn free(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain_mut(|job| match job.try_wait() {
            Ok(Some(status)) => {
                log::debug!("Job {} finished ({})", job.id(), status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!("Could not poll job {}: {}", job.id(), e);
                false
            }
        });
        before - self.jobs.len()
    }

    fn terminate(&mut self) {
        for mut job in self.jobs.drain(..) {
            if let Err(e) = job.kill() {
                log::debug!("Job {} already gone: {}", job.id(), e);
            }
            job.wait().ok();
        }
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[test]
    fn test_free_reaps_finished_jobs() {
        let dir = tempdir().unwrap();
        let mut pool = ProcessPool::default();
        pool.spawn("true", dir.path(), &Environment::new()).unwrap();
        assert_eq!(pool.len(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.len() > 0 && Instant::now() < deadline {
            pool.free();
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_terminate_kills_running_jobs() {
        let dir = tempdir().unwrap();
        let mut pool = ProcessPool::default();
        pool.spawn("sleep 30", dir.path(), &Environment::new()).unwrap();
        assert_eq!(pool.free(), 0);
        pool.terminate();
        assert_eq!(pool.len(), 0);
    }
}
