//! `explockout schedule` / `explockout wait` — local wait-window arithmetic.

use anyhow::{bail, Result};
use explockout_core::{GateConfig, LockoutConfig};

/// Resolve lockout parameters: explicit flags win over the config file.
pub fn resolve(
    config_path: Option<&str>,
    basetime: Option<u64>,
    maxtime: Option<u64>,
) -> Result<LockoutConfig> {
    let mut lockout = match config_path {
        Some(path) => GateConfig::load(std::path::Path::new(path))?.lockout,
        None => LockoutConfig::default(),
    };
    if let Some(basetime) = basetime {
        lockout.basetime = basetime;
    }
    if let Some(maxtime) = maxtime {
        lockout.maxtime = maxtime;
    }
    Ok(lockout)
}

/// Render the wait window after each of the first `count` failures.
pub fn render_schedule(lockout: &LockoutConfig, count: usize) -> Vec<String> {
    let mut cumulative: u64 = 0;
    lockout
        .schedule(count)
        .enumerate()
        .map(|(i, wait)| {
            cumulative = cumulative.saturating_add(wait);
            let capped = if wait == lockout.maxtime { "  (max)" } else { "" };
            format!(
                "  {:>4} failure(s): wait {:>8}  cumulative {:>10}{capped}",
                i + 1,
                human(wait),
                human(cumulative),
            )
        })
        .collect()
}

/// Run the schedule command.
pub fn run_schedule(lockout: LockoutConfig, count: usize) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    println!(
        "basetime={}s maxtime={}s",
        lockout.basetime, lockout.maxtime
    );
    for line in render_schedule(&lockout, count) {
        println!("{line}");
    }
    Ok(())
}

/// Run the wait command: a single window.
pub fn run_wait(lockout: LockoutConfig, failures: usize) -> Result<()> {
    let wait = lockout.wait_for(failures).as_secs();
    if failures == 0 {
        println!("no failures: no lockout");
    } else {
        println!("{wait}");
    }
    Ok(())
}

/// Format seconds as the largest fitting unit.
pub fn human(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d{:02}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
