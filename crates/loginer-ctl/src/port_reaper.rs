use std::time::Duration;

use tracing::{debug, warn};

/// Finds every process listening on `port`. Permission failures along the
/// way degrade to an empty result; the caller treats that as "nothing to
/// reap" and logs it.
pub fn find_listening_pids(port: u16) -> Vec<u32> {
    #[cfg(target_os = "linux")]
    {
        return linux_find_listening_pids(port);
    }

    #[cfg(target_os = "macos")]
    {
        return macos_find_listening_pids(port);
    }

    #[cfg(target_os = "windows")]
    {
        return windows_find_listening_pids(port);
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = port;
        Vec::new()
    }
}

/// Kills every process still holding `port`. Each kill runs on its own
/// fire-and-forget worker so the caller never blocks on the grace period.
pub fn release_port(port: u16) {
    let pids = find_listening_pids(port);
    if pids.is_empty() {
        debug!(port, "no listener found to reap");
        return;
    }
    if pids.len() > 1 {
        warn!(port, count = pids.len(), "multiple listeners share the port");
    }
    for pid in pids {
        warn!(port, pid, "reaping stale listener");
        tokio::spawn(force_kill(pid));
    }
}

/// Escalating kill: polite interrupt, then SIGKILL/TerminateProcess after a
/// grace period. A process that exits in between is not an error.
pub async fn force_kill(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let target = Pid::from_raw(pid as i32);
        match kill(target, Signal::SIGINT) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(error) => {
                warn!(pid, %error, "interrupt failed");
                return;
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        if kill(target, None).is_ok() {
            match kill(target, Signal::SIGKILL) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(error) => warn!(pid, %error, "hard kill failed"),
            }
        }
    }

    #[cfg(windows)]
    {
        if !windows_terminate(pid) {
            // The interrupt path does not exist for detached consoles; give
            // the process the same grace period before checking again.
            tokio::time::sleep(Duration::from_secs(1)).await;
            if !windows_terminate(pid) {
                warn!(pid, "terminate failed");
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
    }
}

#[cfg(target_os = "linux")]
fn linux_find_listening_pids(port: u16) -> Vec<u32> {
    let mut inodes = Vec::new();
    for (path, _v6) in [("/proc/net/tcp", false), ("/proc/net/tcp6", true)] {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        for line in contents.lines().skip(1) {
            if let Some(inode) = linux_parse_listener_inode(line, port) {
                if !inodes.contains(&inode) {
                    inodes.push(inode);
                }
            }
        }
    }

    let mut pids = Vec::new();
    for inode in inodes {
        if let Some(pid) = linux_find_pid_by_inode(inode) {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

// procfs socket lines: local_address is `HEXADDR:HEXPORT`, state 0A is LISTEN,
// field 9 is the socket inode.
#[cfg(target_os = "linux")]
fn linux_parse_listener_inode(line: &str, port: u16) -> Option<u64> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (_, port_hex) = fields[1].split_once(':')?;
    let local_port = u16::from_str_radix(port_hex, 16).ok()?;
    if local_port != port || fields[3] != "0A" {
        return None;
    }
    fields[9].parse::<u64>().ok()
}

#[cfg(target_os = "linux")]
fn linux_find_pid_by_inode(target_inode: u64) -> Option<u32> {
    for proc_entry in std::fs::read_dir("/proc").ok()? {
        let Ok(proc_entry) = proc_entry else {
            continue;
        };
        let Some(pid) = proc_entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        let Ok(fd_entries) = std::fs::read_dir(proc_entry.path().join("fd")) else {
            continue;
        };
        for fd_entry in fd_entries {
            let Ok(fd_entry) = fd_entry else {
                continue;
            };
            let Ok(link_target) = std::fs::read_link(fd_entry.path()) else {
                continue;
            };
            let link_text = link_target.to_string_lossy();
            if linux_parse_socket_inode(link_text.as_ref()) == Some(target_inode) {
                return Some(pid);
            }
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn linux_parse_socket_inode(link_text: &str) -> Option<u64> {
    link_text
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse::<u64>()
        .ok()
}

#[cfg(target_os = "macos")]
fn macos_find_listening_pids(port: u16) -> Vec<u32> {
    let output = std::process::Command::new("lsof")
        .args(["-nP", "-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
        .output();
    let Ok(output) = output else {
        return Vec::new();
    };

    let mut pids = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Ok(pid) = line.trim().parse::<u32>() {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

#[cfg(target_os = "windows")]
fn windows_find_listening_pids(port: u16) -> Vec<u32> {
    let mut pids = Vec::new();

    for row in windows_query_tcp4_rows().unwrap_or_default() {
        if row.dw_state != windows_native::MIB_TCP_STATE_LISTEN {
            continue;
        }
        if u16::from_be(row.dw_local_port as u16) == port && !pids.contains(&row.dw_owning_pid) {
            pids.push(row.dw_owning_pid);
        }
    }
    for row in windows_query_tcp6_rows().unwrap_or_default() {
        if row.dw_state != windows_native::MIB_TCP_STATE_LISTEN {
            continue;
        }
        if u16::from_be(row.dw_local_port as u16) == port && !pids.contains(&row.dw_owning_pid) {
            pids.push(row.dw_owning_pid);
        }
    }

    pids
}

#[cfg(target_os = "windows")]
fn windows_terminate(pid: u32) -> bool {
    // SAFETY: OpenProcess returns null on failure; the handle is closed on
    // every path after use.
    unsafe {
        let handle = windows_native::OpenProcess(windows_native::PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            return true; // already gone or inaccessible
        }
        let terminated = windows_native::TerminateProcess(handle, 1) != 0;
        windows_native::CloseHandle(handle);
        terminated
    }
}

#[cfg(target_os = "windows")]
fn windows_query_tcp4_rows() -> Option<Vec<windows_native::MibTcpRowOwnerPid>> {
    windows_query_tcp_table::<windows_native::MibTcpRowOwnerPid>(windows_native::AF_INET)
}

#[cfg(target_os = "windows")]
fn windows_query_tcp6_rows() -> Option<Vec<windows_native::MibTcp6RowOwnerPid>> {
    windows_query_tcp_table::<windows_native::MibTcp6RowOwnerPid>(windows_native::AF_INET6)
}

#[cfg(target_os = "windows")]
fn windows_query_tcp_table<Row: Copy>(address_family: u32) -> Option<Vec<Row>> {
    let mut size: u32 = 0;
    // SAFETY: Initial query with null buffer asks the API for the required size.
    let mut result = unsafe {
        windows_native::GetExtendedTcpTable(
            std::ptr::null_mut(),
            &mut size,
            0,
            address_family,
            windows_native::TCP_TABLE_OWNER_PID_LISTENER,
            0,
        )
    };

    if result != windows_native::ERROR_INSUFFICIENT_BUFFER && result != windows_native::NO_ERROR {
        return None;
    }
    if size == 0 {
        return Some(Vec::new());
    }

    let mut buffer = vec![0u8; size as usize];
    // SAFETY: Buffer is allocated with the reported size and writable.
    result = unsafe {
        windows_native::GetExtendedTcpTable(
            buffer.as_mut_ptr().cast(),
            &mut size,
            0,
            address_family,
            windows_native::TCP_TABLE_OWNER_PID_LISTENER,
            0,
        )
    };
    if result != windows_native::NO_ERROR {
        return None;
    }

    if buffer.len() < std::mem::size_of::<u32>() {
        return None;
    }

    // SAFETY: Checked that the buffer contains at least a u32 element count.
    let entry_count = unsafe { (buffer.as_ptr() as *const u32).read_unaligned() } as usize;
    let row_offset = std::mem::size_of::<u32>();
    let row_size = std::mem::size_of::<Row>();
    let required = row_offset.checked_add(entry_count.checked_mul(row_size)?)?;
    if required > buffer.len() {
        return None;
    }

    let mut rows = Vec::with_capacity(entry_count);
    for index in 0..entry_count {
        let start = row_offset + index * row_size;
        // SAFETY: Bounds checked above for each fixed-size row read.
        let row = unsafe { (buffer.as_ptr().add(start) as *const Row).read_unaligned() };
        rows.push(row);
    }

    Some(rows)
}

#[cfg(target_os = "windows")]
mod windows_native {
    use std::ffi::c_void;

    pub const AF_INET: u32 = 2;
    pub const AF_INET6: u32 = 23;

    pub const TCP_TABLE_OWNER_PID_LISTENER: u32 = 3;

    pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
    pub const NO_ERROR: u32 = 0;
    pub const MIB_TCP_STATE_LISTEN: u32 = 2;

    pub const PROCESS_TERMINATE: u32 = 0x0001;

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    pub struct MibTcpRowOwnerPid {
        pub dw_state: u32,
        pub dw_local_addr: u32,
        pub dw_local_port: u32,
        pub dw_remote_addr: u32,
        pub dw_remote_port: u32,
        pub dw_owning_pid: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    pub struct MibTcp6RowOwnerPid {
        pub uc_local_addr: [u8; 16],
        pub dw_local_scope_id: u32,
        pub dw_local_port: u32,
        pub uc_remote_addr: [u8; 16],
        pub dw_remote_scope_id: u32,
        pub dw_remote_port: u32,
        pub dw_state: u32,
        pub dw_owning_pid: u32,
    }

    #[link(name = "iphlpapi")]
    extern "system" {
        pub fn GetExtendedTcpTable(
            tcp_table: *mut c_void,
            tcp_table_size: *mut u32,
            order: i32,
            address_family: u32,
            table_class: u32,
            reserved: u32,
        ) -> u32;
    }

    #[link(name = "kernel32")]
    extern "system" {
        pub fn OpenProcess(desired_access: u32, inherit_handle: i32, pid: u32) -> *mut c_void;
        pub fn TerminateProcess(handle: *mut c_void, exit_code: u32) -> i32;
        pub fn CloseHandle(handle: *mut c_void) -> i32;
    }
}

#[cfg(test)]
mod tests {
    #[cfg(target_os = "linux")]
    mod linux {
        use super::super::{linux_parse_listener_inode, linux_parse_socket_inode};

        // 0x1F90 == 8080
        const LISTEN_LINE: &str = "   1: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 424242 1 0000000000000000 100 0 0 10 0";
        const ESTAB_LINE: &str = "   2: 0100007F:1F90 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 424243 1 0000000000000000 100 0 0 10 0";

        #[test]
        fn listener_lines_yield_their_inode() {
            assert_eq!(linux_parse_listener_inode(LISTEN_LINE, 8080), Some(424242));
        }

        #[test]
        fn established_lines_and_other_ports_are_skipped() {
            assert_eq!(linux_parse_listener_inode(ESTAB_LINE, 8080), None);
            assert_eq!(linux_parse_listener_inode(LISTEN_LINE, 9999), None);
        }

        #[test]
        fn socket_inode_links_are_parsed() {
            assert_eq!(linux_parse_socket_inode("socket:[424242]"), Some(424242));
            assert_eq!(linux_parse_socket_inode("pipe:[12]"), None);
        }
    }

    #[test]
    fn unbound_port_has_no_listeners() {
        // Port 1 requires root to bind; nothing in a test environment holds it.
        let pids = super::find_listening_pids(1);
        assert!(pids.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn a_live_listener_is_found_by_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        let pids = super::find_listening_pids(port);
        assert!(
            pids.contains(&std::process::id()),
            "expected own pid among {pids:?}"
        );
    }
}
