use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Parameters of one run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunRequest {
    pub n_rep: u32,
    pub freq_sync: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WorkerCmd {
    Run(RunRequest),
    Close,
}

/// Single-slot broadcast channel: the latest command plus a running message number.
pub struct CmdChan {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>, // (msg_num, worker_cmd)
    condvar: Arc<Condvar>,
}

impl Default for CmdChan {
    fn default() -> Self {
        Self::new()
    }
}

impl CmdChan {
    pub fn new() -> Self {
        Self {
            cmd: Arc::new(Mutex::new((0, WorkerCmd::Close))),
            condvar: Arc::new(Condvar::new()),
        }
    }

    pub fn new_recvr(&self) -> CmdRecvr {
        // A receiver reacts to messages posted after its creation only
        let (msg_num, _cmd_val) = &*self.cmd.lock();
        CmdRecvr {
            cmd: self.cmd.clone(),
            condvar: self.condvar.clone(),
            viewed_msg_num: *msg_num,
        }
    }

    pub fn send(&self, cmd: WorkerCmd) {
        let mut mutex_guard = self.cmd.lock();
        let (msg_num, cmd_val) = &mut *mutex_guard;
        *cmd_val = cmd;
        *msg_num += 1;
        self.condvar.notify_all();
    }
}

pub struct CmdRecvr {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>,
    condvar: Arc<Condvar>,
    viewed_msg_num: usize,
}

impl CmdRecvr {
    /// Blocks until the next command is posted.
    ///
    /// Fails if more than one command was posted since the last call, since the
    /// slot only holds the latest one.
    pub fn recv(&mut self) -> Result<WorkerCmd, String> {
        let mut mutex_guard = self.cmd.lock();
        while mutex_guard.0 == self.viewed_msg_num {
            self.condvar.wait(&mut mutex_guard);
        }
        let (msg_num, cmd_val) = &*mutex_guard;
        if *msg_num != self.viewed_msg_num + 1 {
            return Err(format!(
                "Viewed msg count {} diverged from the published command number {}",
                self.viewed_msg_num, *msg_num
            ));
        }
        self.viewed_msg_num += 1;
        Ok(*cmd_val)
    }
}
