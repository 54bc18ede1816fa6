use anyhow::Result;
use std::path::Path;

use stowage_core::config::StowageConfig;

pub fn run(base_dir: &Path) -> Result<()> {
    println!("Initializing Stowage in {}", base_dir.display());

    std::fs::create_dir_all(base_dir)?;

    let config_path = StowageConfig::default_path(base_dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        let config = StowageConfig::default_config(base_dir);
        config.save(&config_path)?;
        println!("Created config: {}", config_path.display());
    }

    // The default target is a local directory; create it so `send` works out of the box.
    let config = StowageConfig::load(&config_path)?;
    if let Some(dir) = config.stowage.target_uri.strip_prefix("file://") {
        std::fs::create_dir_all(dir)?;
        println!("Local target directory: {dir}");
    }

    println!("\nStowage initialized. Next steps:");
    println!(
        "  1. Point target_uri in {} at your bucket (e.g. s3://my-bucket/backups/)",
        config_path.display()
    );
    println!("  2. Run `stowage send <files>` to upload volumes");

    Ok(())
}
