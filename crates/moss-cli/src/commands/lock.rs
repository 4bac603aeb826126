use anyhow::{bail, Context, Result};
use console::style;
use moss::config::find_config_dir;
use moss::config_lock::{process_alive, ConfigLock};

pub async fn info() -> Result<()> {
    let config_dir = find_config_dir()?;
    let lock = ConfigLock::new(&config_dir);

    if !lock.path().exists() {
        println!("{} is not locked", style(config_dir.display()).cyan());
        return Ok(());
    }
    let Some(record) = lock.inspect().await else {
        println!(
            "{} holds an unreadable lock file: {}",
            style(config_dir.display()).cyan(),
            lock.path().display()
        );
        return Ok(());
    };

    let alive = process_alive(record.pid).await;
    println!("{} is locked", style(config_dir.display()).cyan());
    println!(
        "  {}: {} ({})",
        style("pid").dim(),
        record.pid,
        if alive {
            style("running").green()
        } else {
            style("not running").yellow()
        }
    );
    if let Some(acquired) = record.acquired_at() {
        println!("  {}: {}", style("since").dim(), acquired.to_rfc3339());
    }
    println!("  {}: {}", style("command").dim(), record.command);
    println!("  {}: {}", style("cwd").dim(), record.cwd);
    Ok(())
}

/// Remove the lock file. A live holder is only evicted with `force`.
pub async fn clear(force: bool) -> Result<()> {
    let config_dir = find_config_dir()?;
    let mut lock = ConfigLock::new(&config_dir);

    if !lock.path().exists() {
        println!("No lock to clear");
        return Ok(());
    }
    if !force {
        if let Some(record) = lock.inspect().await {
            if process_alive(record.pid).await {
                bail!(
                    "lock is held by running process {} ({}); pass --force to remove it anyway",
                    record.pid,
                    record.command
                );
            }
        }
    }

    lock.force_clear()
        .await
        .with_context(|| format!("Failed to remove {}", lock.path().display()))?;
    println!("Cleared lock {}", style(lock.path().display()).cyan());
    Ok(())
}
