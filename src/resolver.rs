//! Port to pid resolution.
//!
//! A dial-and-close probe first confirms something accepts connections on
//! the port. Only then are the kernel socket tables (/proc/net/tcp and
//! tcp6) searched for the port's socket inodes, and /proc/<pid>/fd scanned
//! for the process holding one of them.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::ResolveError;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const TCP_LISTEN: u8 = 0x0A;

/// Maps a listening port to the owning pid.
pub trait PidResolver: Send + Sync {
    fn resolve_by_port(&self, host: &str, port: u16) -> Result<u32, ResolveError>;
}

/// One row of /proc/net/tcp or /proc/net/tcp6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEntry {
    pub local_port: u16,
    pub state: u8,
    pub inode: u64,
}

/// Parses a data row of /proc/net/tcp{,6}. Returns `None` for the header
/// and malformed rows.
pub fn parse_socket_line(line: &str) -> Option<SocketEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 || !fields[0].ends_with(':') {
        return None;
    }
    let (_, port_hex) = fields[1].rsplit_once(':')?;
    Some(SocketEntry {
        local_port: u16::from_str_radix(port_hex, 16).ok()?,
        state: u8::from_str_radix(fields[3], 16).ok()?,
        inode: fields[9].parse().ok()?,
    })
}

/// Extracts the inode from an fd link target such as `socket:[12345]`.
pub fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Resolver reading the socket tables of a /proc tree.
pub struct ProcessResolver {
    proc_root: PathBuf,
    probe_timeout: Duration,
}

impl Default for ProcessResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessResolver {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Connects and immediately closes. Any address that accepts is enough.
    fn probe_listener(&self, host: &str, port: u16) -> io::Result<()> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no address");
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.probe_timeout) {
                Ok(stream) => {
                    drop(stream);
                    return Ok(());
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Socket inodes bound to `port`. Listening sockets are preferred; any
    /// socket with that local port is accepted when none is listening.
    pub fn port_inodes(&self, port: u16) -> io::Result<HashSet<u64>> {
        let mut listening = HashSet::new();
        let mut other = HashSet::new();
        let mut found_table = false;

        for table in ["net/tcp", "net/tcp6"] {
            let content = match fs::read_to_string(self.proc_root.join(table)) {
                Ok(c) => c,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            found_table = true;
            for entry in content.lines().filter_map(parse_socket_line) {
                if entry.local_port != port || entry.inode == 0 {
                    continue;
                }
                if entry.state == TCP_LISTEN {
                    listening.insert(entry.inode);
                } else {
                    other.insert(entry.inode);
                }
            }
        }

        if !found_table {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no TCP socket table under the proc root",
            ));
        }
        Ok(if listening.is_empty() { other } else { listening })
    }

    /// First pid (ascending) holding an fd to one of `inodes`.
    ///
    /// Processes whose fd directory cannot be read are skipped.
    pub fn owner_of(&self, inodes: &HashSet<u64>) -> io::Result<Option<u32>> {
        if inodes.is_empty() {
            return Ok(None);
        }

        let mut pids: Vec<u32> = fs::read_dir(&self.proc_root)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        pids.sort_unstable();

        for pid in pids {
            let fd_dir = self.proc_root.join(pid.to_string()).join("fd");
            let entries = match fs::read_dir(&fd_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Skipping pid {}: {}", pid, e);
                    continue;
                }
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let Ok(link) = fs::read_link(entry.path()) else {
                    continue;
                };
                if link
                    .to_str()
                    .and_then(socket_inode)
                    .is_some_and(|inode| inodes.contains(&inode))
                {
                    return Ok(Some(pid));
                }
            }
        }
        Ok(None)
    }
}

impl PidResolver for ProcessResolver {
    fn resolve_by_port(&self, host: &str, port: u16) -> Result<u32, ResolveError> {
        self.probe_listener(host, port)
            .map_err(|source| ResolveError::NoListener {
                host: host.to_string(),
                port,
                source,
            })?;

        let inodes = self.port_inodes(port)?;
        debug!("Port {} maps to socket inodes {:?}", port, inodes);

        match self.owner_of(&inodes)? {
            Some(pid) => {
                info!("Resolved port {} to pid {}", port, pid);
                Ok(pid)
            }
            None => Err(ResolveError::NoOwner(port)),
        }
    }
}
