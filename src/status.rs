/// Convert a raw `waitpid` status into shell-style exit code semantics.
///
/// Processes terminated by a signal map to `128 + signal`. Returns `None`
/// for statuses that are neither an exit nor a signal death (e.g. a stop).
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
