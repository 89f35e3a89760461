//! Acquisition on a dedicated thread.
//!
//! The worker owns the board connection and shares the session through an
//! `Arc<Mutex<Experiment>>`. A run holds the session lock from compile to the last
//! decoded word, so edits from other threads wait for the run to end and never see
//! a half-uploaded program. Results come back through a channel in request order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::board::Board;
use crate::error::{Error, Result};
use crate::experiment::Experiment;
use crate::reader::{AcquisitionResult, ReaderSettings};
use crate::transport::Transport;
use crate::worker_cmd_chan::{CmdChan, CmdRecvr, RunRequest, WorkerCmd};

type RunOutcome = Result<AcquisitionResult>;

fn worker_loop<T: Transport>(
    session: Arc<Mutex<Experiment>>,
    mut board: Board<T>,
    settings: ReaderSettings,
    mut cmd_recvr: CmdRecvr,
    result_sendr: Sender<RunOutcome>,
) -> Result<()> {
    loop {
        match cmd_recvr.recv().map_err(Error::Worker)? {
            WorkerCmd::Run(request) => {
                log::debug!("worker: run {:?}", request);
                let outcome = {
                    let mut exp = session.lock();
                    exp.run(&mut board, request.n_rep, request.freq_sync, &settings)
                };
                if let Err(err) = &outcome {
                    log::error!("run failed: {}", err);
                }
                result_sendr
                    .send(outcome)
                    .map_err(|_| Error::Worker("result receiver dropped".into()))?;
            }
            WorkerCmd::Close => break,
        }
    }
    log::debug!("worker: closed");
    Ok(())
}

pub struct AcqWorker {
    session: Arc<Mutex<Experiment>>,
    cmd_chan: CmdChan,
    results: Receiver<RunOutcome>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl AcqWorker {
    pub fn spawn<T: Transport + Send + 'static>(
        session: Arc<Mutex<Experiment>>,
        board: Board<T>,
        settings: ReaderSettings,
    ) -> Result<Self> {
        let cmd_chan = CmdChan::new();
        let cmd_recvr = cmd_chan.new_recvr();
        let (result_sendr, results) = crossbeam::channel::unbounded();
        let worker_session = session.clone();
        let handle = thread::Builder::new()
            .name("rfsoc-acq".into())
            .spawn(move || worker_loop(worker_session, board, settings, cmd_recvr, result_sendr))
            .map_err(|err| Error::Worker(format!("cannot spawn worker: {}", err)))?;
        Ok(Self {
            session,
            cmd_chan,
            results,
            handle: Some(handle),
        })
    }

    pub fn session(&self) -> &Arc<Mutex<Experiment>> {
        &self.session
    }

    /// Queues a run. Only one request may be outstanding; collect its result
    /// before the next request.
    pub fn request(&self, request: RunRequest) {
        self.cmd_chan.send(WorkerCmd::Run(request));
    }

    pub fn recv_result(&self) -> RunOutcome {
        self.results
            .recv()
            .map_err(|_| Error::Worker("worker stopped".into()))?
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> RunOutcome {
        match self.results.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(Error::Worker(format!(
                "no result within {:?}",
                timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Worker("worker stopped".into())),
        }
    }

    pub fn run(&self, request: RunRequest) -> RunOutcome {
        self.request(request);
        self.recv_result()
    }

    /// Stops the worker and reports how its loop ended.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                self.cmd_chan.send(WorkerCmd::Close);
                handle
                    .join()
                    .map_err(|_| Error::Worker("worker panicked".into()))?
            }
            None => Ok(()),
        }
    }
}

impl Drop for AcqWorker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("acquisition worker: {}", err);
        }
    }
}
