//! Check-config command: validate config and print the effective policy.

use anyhow::Result;
use upretry_core::config::UpretryConfig;

/// Print the retry policy and cluster limits described by `cfg`.
pub fn run_check_config(cfg: &UpretryConfig) -> Result<()> {
    cfg.validate()?;
    let policy = cfg.retry_policy()?;

    println!("retry_on:                    {}", policy.retry_on);
    println!("num_retries:                 {}", policy.num_retries);
    println!("base_interval:               {:?}", policy.base_interval());
    println!("max_interval:                {:?}", policy.max_interval());
    println!("retriable_status_codes:      {:?}", policy.retriable_status_codes);
    println!("host_selection_max_attempts: {}", policy.host_selection_max_attempts);
    for c in &cfg.clusters {
        println!(
            "cluster {}: max_retries={} max_retries_high={}",
            c.name, c.max_retries, c.max_retries_high
        );
    }
    for (key, pct) in &cfg.runtime {
        println!("runtime {}={}%", key, pct);
    }
    Ok(())
}
