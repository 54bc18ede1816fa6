use anyhow::Result;
use std::path::Path;

use super::{ctrl_c_token, load_config, open_backend};

pub async fn run(prefix: &str, base_dir: &Path) -> Result<()> {
    let config = load_config(base_dir)?;
    let cancel = ctrl_c_token();
    let backend = open_backend(&config, &cancel).await?;

    let names = backend.list(&cancel, prefix).await;
    backend.close().await?;
    let names = names?;

    if names.is_empty() {
        println!("No objects found.");
        return Ok(());
    }
    for name in &names {
        println!("{name}");
    }
    println!("{} object(s)", names.len());

    Ok(())
}
