// Linux-specific fallbacks: /proc/cpuinfo and /sys/class/thermal.

/// First "model name" from /proc/cpuinfo.
pub(super) fn read_cpu_model_linux() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        for line in content.lines() {
            if line.starts_with("model name") {
                let name = line
                    .find(": ")
                    .map(|i| line[i + 2..].trim())
                    .filter(|s| !s.is_empty() && *s != "cpu0")?;
                return Some(name.to_string());
            }
        }
    }
    None
}

/// `(type, °C)` per thermal zone, for hosts where sysinfo lists no components.
/// The kernel reports millidegrees.
pub(super) fn read_thermal_zones() -> Vec<(String, f64)> {
    #[cfg(target_os = "linux")]
    {
        let Ok(entries) = std::fs::read_dir("/sys/class/thermal") else {
            return Vec::new();
        };
        let mut zones: Vec<(String, f64)> = entries
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
            .filter_map(|e| {
                let path = e.path();
                let millis: i64 = std::fs::read_to_string(path.join("temp"))
                    .ok()?
                    .trim()
                    .parse()
                    .ok()?;
                let label = std::fs::read_to_string(path.join("type"))
                    .map(|t| t.trim().to_string())
                    .unwrap_or_else(|_| e.file_name().to_string_lossy().into_owned());
                Some((label, millis as f64 / 1000.0))
            })
            .collect();
        zones.sort_by(|a, b| a.0.cmp(&b.0));
        zones
    }
    #[cfg(not(target_os = "linux"))]
    Vec::new()
}
