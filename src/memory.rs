//! Host memory self-test.
//!
//! The host must hold every payload of a run in memory at once, so before
//! generating the pool it asks a [`MemoryProbe`] how much physical memory is
//! available and compares that against the pool size plus a safety headroom.
//!
//! Probes are selected once at startup by [`probe_for_platform`]:
//! - Linux: `/proc/meminfo` (`MemAvailable`), falling back to `sysinfo(2)`
//! - Other platforms: no probe, every self-test is denied
//!
//! A configured fixed availability replaces the platform probe entirely.

use std::sync::Arc;
use tracing::{debug, warn};

/// The platform probe could not report available memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeError(pub String);

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memory probe unavailable: {}", self.0)
    }
}

impl std::error::Error for ProbeError {}

/// Source of "how many bytes of physical memory are available right now".
pub trait MemoryProbe: Send + Sync {
    fn available_bytes(&self) -> Result<u64, ProbeError>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Reports a constant amount of available memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub u64);

impl MemoryProbe for FixedProbe {
    fn available_bytes(&self) -> Result<u64, ProbeError> {
        Ok(self.0)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Used on platforms without a probe implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedProbe;

impl MemoryProbe for UnsupportedProbe {
    fn available_bytes(&self) -> Result<u64, ProbeError> {
        Err(ProbeError(format!(
            "no memory probe for platform '{}'",
            std::env::consts::OS
        )))
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

/// Reads `MemAvailable` (or `MemFree`) from a meminfo-format file.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct MemInfoProbe {
    path: std::path::PathBuf,
}

#[cfg(target_os = "linux")]
impl MemInfoProbe {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(target_os = "linux")]
impl Default for MemInfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl MemoryProbe for MemInfoProbe {
    fn available_bytes(&self) -> Result<u64, ProbeError> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| ProbeError(format!("{}: {}", self.path.display(), e)))?;
        parse_meminfo(&contents)
    }

    fn name(&self) -> &'static str {
        "meminfo"
    }
}

/// Free RAM reported by `sysinfo(2)`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoProbe;

#[cfg(target_os = "linux")]
impl MemoryProbe for SysinfoProbe {
    fn available_bytes(&self) -> Result<u64, ProbeError> {
        // SAFETY: sysinfo only writes into the zeroed struct we pass.
        let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::sysinfo(&mut info) };
        if rc != 0 {
            return Err(ProbeError(format!(
                "sysinfo failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let unit = (info.mem_unit as u64).max(1);
        Ok((info.freeram as u64).saturating_mul(unit))
    }

    fn name(&self) -> &'static str {
        "sysinfo"
    }
}

/// Tries each probe in order and returns the first success.
pub struct FallbackProbe {
    probes: Vec<Box<dyn MemoryProbe>>,
}

impl FallbackProbe {
    pub fn new(probes: Vec<Box<dyn MemoryProbe>>) -> Self {
        Self { probes }
    }
}

impl MemoryProbe for FallbackProbe {
    fn available_bytes(&self) -> Result<u64, ProbeError> {
        let mut last = ProbeError("no probes configured".to_string());
        for probe in &self.probes {
            match probe.available_bytes() {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    debug!(probe = probe.name(), error = %e, "Memory probe failed");
                    last = e;
                }
            }
        }
        Err(last)
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

/// Parse the available byte count out of `/proc/meminfo` contents.
pub fn parse_meminfo(contents: &str) -> Result<u64, ProbeError> {
    let field = |name: &str| -> Option<u64> {
        contents.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            let kib = rest.trim().trim_end_matches("kB").trim();
            kib.parse::<u64>().ok()
        })
    };

    field("MemAvailable")
        .or_else(|| field("MemFree"))
        .map(|kib| kib.saturating_mul(1024))
        .ok_or_else(|| ProbeError("no MemAvailable or MemFree entry".to_string()))
}

/// Select the memory probe for the running platform.
pub fn probe_for_platform() -> Arc<dyn MemoryProbe> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(FallbackProbe::new(vec![
            Box::new(MemInfoProbe::new()),
            Box::new(SysinfoProbe),
        ]))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedProbe)
    }
}

/// Outcome of a pre-flight self-test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfTest {
    /// Enough memory to hold the pool plus headroom
    Pass,
    /// Not enough memory; `required` is `None` when the request overflows
    Fail { required: Option<u64> },
    /// The probe could not run; treated as a failure by the host
    ProbeUnavailable(String),
}

/// Compares a requested pool size against available memory.
#[derive(Clone)]
pub struct MemoryGate {
    probe: Arc<dyn MemoryProbe>,
    headroom_percent: u32,
}

impl MemoryGate {
    pub fn new(probe: Arc<dyn MemoryProbe>, headroom_percent: u32) -> Self {
        Self {
            probe,
            headroom_percent,
        }
    }

    pub fn headroom_percent(&self) -> u32 {
        self.headroom_percent
    }

    /// True iff available memory exceeds `required` plus the configured headroom.
    pub fn check_capacity(&self, required: u64) -> Result<bool, ProbeError> {
        let available = self.probe.available_bytes()?;
        let enough = fits(available, required, self.headroom_percent);
        debug!(
            probe = self.probe.name(),
            required,
            available,
            headroom_percent = self.headroom_percent,
            enough,
            "Memory capacity check"
        );
        Ok(enough)
    }

    /// Self-test for a pool needing `required` bytes in total.
    pub fn self_test(&self, required: Option<u64>) -> SelfTest {
        let Some(required) = required else {
            return SelfTest::Fail { required: None };
        };

        match self.check_capacity(required) {
            Ok(true) => SelfTest::Pass,
            Ok(false) => SelfTest::Fail {
                required: Some(required),
            },
            Err(e) => {
                warn!(probe = self.probe.name(), error = %e, "Memory probe unavailable");
                SelfTest::ProbeUnavailable(e.0)
            }
        }
    }
}

fn fits(available: u64, required: u64, headroom_percent: u32) -> bool {
    let required = required as u128;
    let needed = required + required * headroom_percent as u128 / 100;
    available as u128 > needed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(available: u64, headroom: u32) -> MemoryGate {
        MemoryGate::new(Arc::new(FixedProbe(available)), headroom)
    }

    #[test]
    fn test_check_capacity_boundary() {
        let g = gate(1000, 0);
        assert!(g.check_capacity(999).unwrap());
        // Strictly greater is required
        assert!(!g.check_capacity(1000).unwrap());
        assert!(!g.check_capacity(5000).unwrap());
    }

    #[test]
    fn test_check_capacity_uses_gate_headroom() {
        // 800 + 25% = 1000, not strictly less
        assert!(!gate(1000, 25).check_capacity(800).unwrap());
        assert!(gate(1000, 25).check_capacity(799).unwrap());
        assert!(gate(1000, 100).check_capacity(400).unwrap());
        assert!(!gate(1000, 100).check_capacity(500).unwrap());
    }

    #[test]
    fn test_check_capacity_all_sizes_under_limit() {
        let g = gate(10_000, 10);
        for required in (0..9_000).step_by(97) {
            assert!(g.check_capacity(required).unwrap(), "{}", required);
        }
        for required in (9_091..20_000).step_by(97) {
            assert!(!g.check_capacity(required).unwrap(), "{}", required);
        }
    }

    #[test]
    fn test_check_capacity_no_overflow() {
        let g = gate(u64::MAX, 1000);
        assert!(!g.check_capacity(u64::MAX).unwrap());
    }

    #[test]
    fn test_probe_unavailable() {
        let g = MemoryGate::new(Arc::new(UnsupportedProbe), 0);
        assert!(g.check_capacity(1).is_err());
        assert!(matches!(g.self_test(Some(1)), SelfTest::ProbeUnavailable(_)));
    }

    #[test]
    fn test_self_test() {
        let g = gate(1 << 20, 0);
        assert_eq!(g.self_test(Some(10 * 1024)), SelfTest::Pass);
        assert_eq!(
            g.self_test(Some(2 << 20)),
            SelfTest::Fail {
                required: Some(2 << 20)
            }
        );
        assert_eq!(g.self_test(None), SelfTest::Fail { required: None });
    }

    #[test]
    fn test_self_test_applies_headroom() {
        // Same request passes or fails depending on the configured margin
        assert_eq!(gate(1000, 0).self_test(Some(600)), SelfTest::Pass);
        assert_eq!(
            gate(1000, 80).self_test(Some(600)),
            SelfTest::Fail {
                required: Some(600)
            }
        );
    }

    #[test]
    fn test_fallback_probe() {
        let probe = FallbackProbe::new(vec![Box::new(UnsupportedProbe), Box::new(FixedProbe(42))]);
        assert_eq!(probe.available_bytes().unwrap(), 42);

        let probe = FallbackProbe::new(vec![Box::new(UnsupportedProbe)]);
        assert!(probe.available_bytes().is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let contents = "MemTotal:       16318640 kB\n\
                        MemFree:         1024000 kB\n\
                        MemAvailable:    8000000 kB\n";
        assert_eq!(parse_meminfo(contents).unwrap(), 8_000_000 * 1024);

        let old_kernel = "MemTotal: 100 kB\nMemFree: 50 kB\n";
        assert_eq!(parse_meminfo(old_kernel).unwrap(), 50 * 1024);

        assert!(parse_meminfo("MemTotal: 100 kB\n").is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_platform_probe_reports_memory() {
        let available = probe_for_platform().available_bytes().unwrap();
        assert!(available > 0);
    }
}
