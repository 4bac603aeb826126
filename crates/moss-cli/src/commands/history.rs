use anyhow::Result;
use console::style;
use moss::config::{find_config_dir, lock_timeout_in};
use moss::config_lock::ConfigLock;
use moss::memory::MessageLog;

/// Empty the message log, holding the config lock so no session writes meanwhile.
pub async fn clear() -> Result<()> {
    let config_dir = find_config_dir()?;
    let mut lock = ConfigLock::new(&config_dir);
    lock.acquire(lock_timeout_in(&config_dir)?).await?;

    let log = MessageLog::in_dir(&config_dir);
    let result = log.clear().await;
    lock.release().await;
    result?;

    println!("Cleared history in {}", style(log.path().display()).cyan());
    Ok(())
}
