//! Exit analysis for worker subprocesses.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::{Serialize, Serializer};

/// Reason why a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Status could not be collected (e.g. already reaped elsewhere).
    Unknown,
}

impl TerminationReason {
    /// Check if the process died from a fault rather than an exit or a kill.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::Signaled(Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGABRT | Signal::SIGILL | Signal::SIGFPE)
        )
    }

    /// Shell-style exit code: the status for exits, `128 + signo` for signals.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            Self::Signaled(sig) => Some(128 + *sig as i32),
            Self::Unknown => None,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(Signal::SIGKILL) => "killed by SIGKILL (timeout or OOM killer)".to_string(),
            Self::Signaled(sig) if self.is_fault() => format!("crashed with {:?}", sig),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl Serialize for TerminationReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        _ => TerminationReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_analyze_wait_status() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            analyze_wait_status(WaitStatus::Exited(pid, 3)),
            TerminationReason::Exited(3)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGSEGV, false)),
            TerminationReason::Signaled(Signal::SIGSEGV)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            TerminationReason::Unknown
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TerminationReason::Exited(0).exit_code(), Some(0));
        assert_eq!(TerminationReason::Exited(3).exit_code(), Some(3));
        assert_eq!(
            TerminationReason::Signaled(Signal::SIGKILL).exit_code(),
            Some(137)
        );
        assert_eq!(TerminationReason::Unknown.exit_code(), None);
    }

    #[test]
    fn test_fault_classification() {
        assert!(TerminationReason::Signaled(Signal::SIGSEGV).is_fault());
        assert!(TerminationReason::Signaled(Signal::SIGABRT).is_fault());
        assert!(!TerminationReason::Signaled(Signal::SIGTERM).is_fault());
        assert!(!TerminationReason::Exited(1).is_fault());
    }

    #[test]
    fn test_serializes_as_description() {
        let json = serde_json::to_string(&TerminationReason::Exited(3)).unwrap();
        assert_eq!(json, "\"exited with code 3\"");
    }
}
