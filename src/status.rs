/// Decode a raw `waitpid` status into a shell-style exit code.
///
/// Mirrors the macros `WIFEXITED`/`WEXITSTATUS`/`WIFSIGNALED`/`WTERMSIG`
/// rather than the exit-status byte the original C dispatches on (see the
/// classification-ambiguity design note): a process killed by a signal
/// reports `128 + signal`, matching typical shell convention. Returns
/// `None` for a status that is neither an exit nor a signal death (e.g.
/// `WIFSTOPPED`), which should not occur for a terminal job record.
pub fn exit_code_from_wait_status(raw_status: libc::c_int) -> Option<i32> {
    if unsafe { libc::WIFEXITED(raw_status) } {
        return Some(unsafe { libc::WEXITSTATUS(raw_status) });
    }

    if unsafe { libc::WIFSIGNALED(raw_status) } {
        let signal = unsafe { libc::WTERMSIG(raw_status) };
        return Some(128 + signal);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_normal_exit() {
        // waitpid status for "exited with code 3": low byte 0, code in bits 8-15.
        let raw = 3 << 8;
        assert_eq!(exit_code_from_wait_status(raw), Some(3));
    }

    #[test]
    fn decodes_signal_death() {
        // status for "terminated by signal 9" (no core dump): low 7 bits = signal.
        let raw = 9;
        assert_eq!(exit_code_from_wait_status(raw), Some(128 + 9));
    }
}
