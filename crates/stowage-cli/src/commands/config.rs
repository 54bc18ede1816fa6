use anyhow::Result;
use std::path::Path;

use stowage_core::config::StowageConfig;

pub fn run(base_dir: &Path) -> Result<()> {
    let config_path = StowageConfig::default_path(base_dir);
    let config = StowageConfig::load(&config_path)?;
    let s = &config.stowage;

    println!("Config: {}", config_path.display());
    println!();
    println!("  Target:           {}", s.target_uri);
    println!("  Part size:        {} MiB", s.upload_chunk_size_mib);
    println!("  Parallel uploads: {}", s.max_parallel_uploads);
    println!("  Max backoff:      {}s", s.max_backoff_secs);
    println!("  Retry budget:     {}s", s.max_retry_secs);
    println!("  Failure policy:   {}", s.failure_policy);
    println!();

    if s.target_uri.starts_with("s3://") {
        let s3 = &config.s3;
        println!("  S3:");
        println!(
            "    region={} endpoint={} path_style={} storage_class={}",
            s3.region.as_deref().unwrap_or("(default chain)"),
            s3.endpoint_url.as_deref().unwrap_or("(aws)"),
            s3.path_style
                .map_or_else(|| "auto".to_string(), |p| p.to_string()),
            s3.storage_class.as_deref().unwrap_or("STANDARD"),
        );
        let r = &config.restore;
        println!(
            "    restore: {} days, {} tier, poll {}s..{}s, give up after {}s",
            r.days, r.tier, r.poll_interval_secs, r.max_poll_interval_secs, r.max_poll_secs
        );
    }

    Ok(())
}
