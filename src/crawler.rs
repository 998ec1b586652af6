//! Top-level coordinator: owns the state file and the worker pool,
//! turns seed callsigns into discovery tasks, and drains the pool before
//! the state file is written back.

use crate::callsign::Callsign;
use crate::config::Config;
use crate::discovery::DiscoveryTask;
use crate::error::Result;
use crate::net::{Ax25Connector, PacketConnector};
use crate::pool::{Control, WorkerPool};
use crate::state::StateFile;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Crawler {
    config: Config,
    state: Arc<StateFile>,
    connector: Arc<dyn PacketConnector>,
}

impl Crawler {
    /// Open the state file and set up the AX.25 connector.
    pub fn new(config: Config) -> Result<Self> {
        let connector = Arc::new(Ax25Connector::new(
            config.local.clone(),
            config.response_timeout,
        ));
        Self::with_connector(config, connector)
    }

    /// Like [`new`](Self::new) with a caller-supplied transport; this is
    /// the seam the dialogue tests connect through.
    pub fn with_connector(config: Config, connector: Arc<dyn PacketConnector>) -> Result<Self> {
        let state = Arc::new(StateFile::open(&config.state_path)?);
        info!(
            path = %config.state_path.display(),
            known_nodes = state.len(),
            "state file open"
        );
        Ok(Crawler {
            config,
            state,
            connector,
        })
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    /// Read seeds, fan out discovery tasks, wait for every task to
    /// finish, and flush the state file.
    pub fn run(&mut self, seeds: impl BufRead) -> Result<()> {
        let mut pool = WorkerPool::new(self.config.threads);

        let seeded = self.enqueue_seeds(&pool, seeds)?;
        info!(seeds = seeded, threads = self.config.threads, "seed intake complete");

        if self.config.resume {
            let pending = self.state.take_pending();
            info!(count = pending.len(), "resuming pending nodes from previous runs");
            for node in pending {
                let callsign = self.state.lock().callsign(node)?;
                self.spawn_task(&pool, callsign);
            }
        }

        // Graceful: every enqueued task runs before the sentinels.
        pool.shutdown();
        self.state.flush()?;
        Ok(())
    }

    /// One callsign per line; trailing CR/LF trimmed, blank and
    /// single-character lines skipped.
    fn enqueue_seeds(&self, pool: &WorkerPool, seeds: impl BufRead) -> Result<usize> {
        let mut count = 0;
        for line in seeds.lines() {
            let line = line?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.len() <= 1 {
                continue;
            }
            let callsign = match Callsign::parse(trimmed) {
                Ok(cs) => cs,
                Err(e) => {
                    warn!(line = trimmed, error = %e, "skipping malformed seed");
                    continue;
                }
            };
            self.state.append_root_node(&callsign)?;
            self.spawn_task(pool, callsign);
            count += 1;
        }
        Ok(count)
    }

    fn spawn_task(&self, pool: &WorkerPool, target: Callsign) {
        let state = Arc::clone(&self.state);
        let connector = Arc::clone(&self.connector);
        pool.submit(move || {
            let task = DiscoveryTask::new(&state, connector.as_ref(), target.clone());
            if let Err(e) = task.run() {
                warn!(target = %target, error = %e, "discovery failed; node left unvisited");
            }
            Control::Continue
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AirwalkError;
    use crate::net::PacketStream;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    /// Connector whose streams close immediately after accept.
    struct SilentConnector;

    struct ClosedStream;

    impl PacketStream for ClosedStream {
        fn send(&mut self, _data: &[u8]) -> crate::error::Result<()> {
            Err(AirwalkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer closed",
            )))
        }

        fn recv(&mut self, _buf: &mut [u8]) -> crate::error::Result<usize> {
            Ok(0)
        }
    }

    impl PacketConnector for SilentConnector {
        fn connect(&self, _remote: &Callsign) -> crate::error::Result<Box<dyn PacketStream>> {
            Ok(Box::new(ClosedStream))
        }
    }

    fn config_for(path: &std::path::Path) -> Config {
        Config {
            threads: 1,
            state_path: path.to_path_buf(),
            local: Callsign::parse("MYCALL").unwrap(),
            resume: false,
            response_timeout: std::time::Duration::from_millis(10),
        }
    }

    #[test]
    fn test_silent_remote_leaves_seed_pending() {
        let temp = NamedTempFile::new().unwrap();
        let mut crawler =
            Crawler::with_connector(config_for(temp.path()), Arc::new(SilentConnector)).unwrap();
        crawler.run(Cursor::new("N0CALL-1\n")).unwrap();

        let state = crawler.state();
        assert_eq!(state.len(), 1);
        let guard = state.lock();
        let cs = Callsign::parse("N0CALL-1").unwrap();
        let node = guard.find(&cs).unwrap();

        let roots: Vec<_> = guard.root_nodes().map(|n| n.unwrap()).collect();
        assert_eq!(roots, vec![node]);
        assert_eq!(guard.query_count(node).unwrap(), 0);
        let pending: Vec<_> = guard.pending().collect();
        assert_eq!(pending, vec![node]);
    }

    #[test]
    fn test_seed_filtering() {
        let temp = NamedTempFile::new().unwrap();
        let mut crawler =
            Crawler::with_connector(config_for(temp.path()), Arc::new(SilentConnector)).unwrap();
        // Blank lines, a single-character line, and a malformed seed are
        // all skipped; two good seeds remain.
        let input = "\nK\nK9XYZ\r\n\r\nnot a callsign\nW1ABC-2\n";
        crawler.run(Cursor::new(input)).unwrap();
        assert_eq!(crawler.state().len(), 2);
    }

    #[test]
    fn test_state_survives_run_cycle() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut crawler =
                Crawler::with_connector(config_for(temp.path()), Arc::new(SilentConnector))
                    .unwrap();
            crawler.run(Cursor::new("K9XYZ\n")).unwrap();
        }
        let state = StateFile::open(temp.path()).unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.find(&Callsign::parse("K9XYZ").unwrap()).is_some());
    }
}
