//! OS-level process metrics read from the /proc filesystem.
//!
//! CPU and memory are the mandatory part of every snapshot: if either read
//! fails the sampler reports a [`CollectionError`] and the tick is skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::CollectionError;
use crate::types::CpuMetrics;

/// Kernel clock ticks per second (USER_HZ).
static CLOCK_TICKS: Lazy<f64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
});

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
});

/// Resident and virtual size in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidentMemory {
    pub rss: u64,
    pub vms: u64,
}

/// OS process introspection used by the sampler.
pub trait ProcessInspector: Send {
    fn cpu(&mut self, pid: u32) -> Result<CpuMetrics, CollectionError>;
    fn memory(&mut self, pid: u32) -> Result<ResidentMemory, CollectionError>;
}

/// Fields of /proc/<pid>/stat used for CPU accounting, in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
}

/// Parses the content of /proc/<pid>/stat.
///
/// The command name (field 2) may contain spaces and parentheses, so
/// fields are counted from the last ')'.
pub fn parse_proc_stat(content: &str) -> io::Result<ProcStat> {
    let close = content
        .rfind(')')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing comm terminator"))?;
    // Field 3 (state) is index 0 here.
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    let field = |n: usize| -> io::Result<u64> {
        rest.get(n - 3)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, format!("stat field {n} missing"))
            })?
            .parse::<u64>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("stat field {n}: {e}")))
    };

    Ok(ProcStat {
        utime: field(14)?,
        stime: field(15)?,
        starttime: field(22)?,
    })
}

/// Parses /proc/<pid>/statm into bytes.
pub fn parse_statm(content: &str, page_size: u64) -> io::Result<ResidentMemory> {
    let mut parts = content.split_whitespace();
    let mut next = |name: &str| -> io::Result<u64> {
        parts
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("statm {name} missing")))?
            .parse::<u64>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("statm {name}: {e}")))
    };
    let size = next("size")?;
    let resident = next("resident")?;
    Ok(ResidentMemory {
        rss: resident * page_size,
        vms: size * page_size,
    })
}

/// Parses the first field of /proc/uptime (seconds since boot).
pub fn parse_uptime(content: &str) -> io::Result<f64> {
    content
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid /proc/uptime"))
}

/// CPU percent of one core between two cumulative CPU-time readings.
pub fn cpu_percent(prev_cpu_seconds: f64, cpu_seconds: f64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds <= 0.0 {
        return 0.0;
    }
    ((cpu_seconds - prev_cpu_seconds).max(0.0) / elapsed_seconds) * 100.0
}

/// Shortest span a CPU delta is computed over. /proc counts CPU time in
/// whole clock ticks, so shorter windows swing between 0 and several
/// hundred percent.
pub const MIN_CPU_WINDOW: Duration = Duration::from_secs(1);

/// Baseline CPU reading and the usage last reported from it.
#[derive(Debug, Clone, Copy)]
struct CpuEntry {
    pid: u32,
    cpu_seconds: f64,
    taken_at: Instant,
    usage: f64,
}

/// [`ProcessInspector`] backed by /proc.
///
/// CPU usage is the delta since the baseline reading for the same pid. The
/// baseline only moves once [`MIN_CPU_WINDOW`] has passed; calls in between
/// repeat the last usage. The first call falls back to the average over the
/// process lifetime.
pub struct ProcFs {
    root: PathBuf,
    last: Option<CpuEntry>,
    cpu_window: Duration,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last: None,
            cpu_window: MIN_CPU_WINDOW,
        }
    }

    pub fn with_cpu_window(mut self, window: Duration) -> Self {
        self.cpu_window = window;
        self
    }

    fn pid_path(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn lifetime_percent(&self, stat: &ProcStat, cpu_seconds: f64) -> io::Result<f64> {
        let uptime = parse_uptime(&self.read(&self.root.join("uptime"))?)?;
        let started = stat.starttime as f64 / *CLOCK_TICKS;
        Ok(cpu_percent(0.0, cpu_seconds, uptime - started))
    }
}

impl ProcessInspector for ProcFs {
    fn cpu(&mut self, pid: u32) -> Result<CpuMetrics, CollectionError> {
        let now = Instant::now();
        let content = self
            .read(&self.pid_path(pid).join("stat"))
            .map_err(|e| CollectionError::mandatory("cpu", pid, e))?;
        let stat = parse_proc_stat(&content).map_err(|e| CollectionError::mandatory("cpu", pid, e))?;

        let user_time = stat.utime as f64 / *CLOCK_TICKS;
        let system_time = stat.stime as f64 / *CLOCK_TICKS;
        let cpu_seconds = user_time + system_time;

        let usage = match self.last {
            Some(prev) if prev.pid == pid => {
                let elapsed = now.duration_since(prev.taken_at);
                if elapsed < self.cpu_window {
                    return Ok(CpuMetrics {
                        usage: prev.usage,
                        user_time,
                        system_time,
                    });
                }
                cpu_percent(prev.cpu_seconds, cpu_seconds, elapsed.as_secs_f64())
            }
            _ => self.lifetime_percent(&stat, cpu_seconds).unwrap_or_else(|e| {
                debug!("Lifetime CPU estimate unavailable for pid {}: {}", pid, e);
                0.0
            }),
        };

        self.last = Some(CpuEntry {
            pid,
            cpu_seconds,
            taken_at: now,
            usage,
        });

        Ok(CpuMetrics {
            usage,
            user_time,
            system_time,
        })
    }

    fn memory(&mut self, pid: u32) -> Result<ResidentMemory, CollectionError> {
        let content = self
            .read(&self.pid_path(pid).join("statm"))
            .map_err(|e| CollectionError::mandatory("memory", pid, e))?;
        parse_statm(&content, *PAGE_SIZE).map_err(|e| CollectionError::mandatory("memory", pid, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT_LINE: &str = "4242 (node) S 1 4242 4242 0 -1 4194560 5210 0 0 0 \
        250 75 0 0 20 0 11 0 1000 1263534080 12345 18446744073709551615";

    #[test]
    fn test_parse_proc_stat() {
        let stat = parse_proc_stat(STAT_LINE).unwrap();
        assert_eq!(stat.utime, 250);
        assert_eq!(stat.stime, 75);
        assert_eq!(stat.starttime, 1000);
    }

    #[test]
    fn test_parse_proc_stat_with_odd_comm() {
        let line = STAT_LINE.replace("(node)", "(node (worker) 1)");
        let stat = parse_proc_stat(&line).unwrap();
        assert_eq!(stat.utime, 250);
        assert_eq!(stat.starttime, 1000);
    }

    #[test]
    fn test_parse_proc_stat_invalid() {
        assert!(parse_proc_stat("4242 node S 1").is_err());
        assert!(parse_proc_stat("4242 (node) S 1 2 3").is_err());
    }

    #[test]
    fn test_parse_statm() {
        let mem = parse_statm("308480 30000 2000 1 0 40000 0\n", 4096).unwrap();
        assert_eq!(mem.vms, 308480 * 4096);
        assert_eq!(mem.rss, 30000 * 4096);
        assert!(parse_statm("12", 4096).is_err());
    }

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("35.25 120.00\n").unwrap(), 35.25);
        assert!(parse_uptime("").is_err());
    }

    #[test]
    fn test_cpu_percent() {
        assert_eq!(cpu_percent(1.0, 1.5, 1.0), 50.0);
        assert_eq!(cpu_percent(1.0, 3.0, 1.0), 200.0);
        assert_eq!(cpu_percent(2.0, 1.0, 1.0), 0.0);
        assert_eq!(cpu_percent(0.0, 1.0, 0.0), 0.0);
    }

    fn fake_proc(pid: u32, stat: &str, statm: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join(pid.to_string());
        fs::create_dir_all(&pid_dir).unwrap();
        fs::write(pid_dir.join("stat"), stat).unwrap();
        fs::write(pid_dir.join("statm"), statm).unwrap();
        fs::write(dir.path().join("uptime"), "1000.00 4000.00\n").unwrap();
        dir
    }

    #[test]
    fn test_procfs_reads_fake_tree() {
        let dir = fake_proc(4242, STAT_LINE, "1000 500 0 0 0 0 0\n");
        let mut procfs = ProcFs::with_root(dir.path());

        let cpu = procfs.cpu(4242).unwrap();
        assert!((cpu.user_time - 250.0 / *CLOCK_TICKS).abs() < 1e-9);
        assert!((cpu.system_time - 75.0 / *CLOCK_TICKS).abs() < 1e-9);
        assert!(cpu.usage >= 0.0);

        let mem = procfs.memory(4242).unwrap();
        assert_eq!(mem.rss, 500 * *PAGE_SIZE);
        assert_eq!(mem.vms, 1000 * *PAGE_SIZE);
    }

    #[test]
    fn test_cpu_usage_holds_until_window_elapses() {
        use crate::alerts::{evaluate, Thresholds};
        use crate::types::{AlertKind, MetricSnapshot};

        let dir = fake_proc(4242, STAT_LINE, "1000 500 0 0 0 0 0\n");
        let mut procfs = ProcFs::with_root(dir.path());
        let first = procfs.cpu(4242).unwrap();

        // One more clock tick of user time a few milliseconds later.
        let bumped = STAT_LINE.replace(" 250 75 ", " 251 75 ");
        fs::write(dir.path().join("4242").join("stat"), bumped).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = procfs.cpu(4242).unwrap();

        assert_eq!(second.usage, first.usage);
        assert!((second.user_time - 251.0 / *CLOCK_TICKS).abs() < 1e-9);

        let mut snapshot = MetricSnapshot::empty(chrono::Utc::now());
        snapshot.cpu = second;
        let alerts = evaluate(&snapshot, &Thresholds::default());
        assert!(alerts.iter().all(|a| a.kind != AlertKind::Cpu));
    }

    #[test]
    fn test_cpu_usage_recomputed_after_window() {
        let dir = fake_proc(4242, STAT_LINE, "1000 500 0 0 0 0 0\n");
        let mut procfs = ProcFs::with_root(dir.path()).with_cpu_window(Duration::from_millis(1));
        let first = procfs.cpu(4242).unwrap();
        assert!(first.usage > 0.0);

        std::thread::sleep(Duration::from_millis(20));
        // No CPU time consumed since the baseline.
        let second = procfs.cpu(4242).unwrap();
        assert_eq!(second.usage, 0.0);
    }

    #[test]
    fn test_procfs_missing_pid_is_mandatory_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut procfs = ProcFs::with_root(dir.path());
        let err = procfs.cpu(1).unwrap_err();
        assert_eq!(err.metric(), "cpu");
        let err = procfs.memory(1).unwrap_err();
        assert_eq!(err.metric(), "memory");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_procfs_reads_own_process() {
        let mut procfs = ProcFs::new();
        let pid = std::process::id();
        let mem = procfs.memory(pid).unwrap();
        assert!(mem.rss > 0);
        assert!(mem.vms >= mem.rss);
        let first = procfs.cpu(pid).unwrap();
        let second = procfs.cpu(pid).unwrap();
        assert!(second.user_time + second.system_time >= first.user_time + first.system_time);
        assert!(second.usage >= 0.0);
    }
}
