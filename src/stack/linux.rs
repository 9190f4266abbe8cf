//! Linux thread enumeration using procfs

use std::fs;
use std::io;

const TASK_DIR: &str = "/proc/self/task";

/// List `(tid, comm)` for every thread of this process, ordered by tid
pub(super) fn list_threads() -> io::Result<Vec<(usize, String)>> {
    let mut threads = Vec::new();
    for entry in fs::read_dir(TASK_DIR)? {
        let entry = entry?;
        let tid = match entry.file_name().to_str().and_then(|s| s.parse::<usize>().ok()) {
            Some(tid) => tid,
            None => continue,
        };
        // The thread may exit between listing and reading its name.
        let name = match fs::read_to_string(entry.path().join("comm")) {
            Ok(comm) => comm.trim_end().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        threads.push((tid, name));
    }
    threads.sort_by_key(|(tid, _)| *tid);
    Ok(threads)
}
