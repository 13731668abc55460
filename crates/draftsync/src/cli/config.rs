//! Config command handler

use draftsync_core::CollabConfig;

pub fn handle_config_command(
    endpoint: Option<String>,
    account: Option<String>,
    public_key: Option<String>,
    show: bool,
) -> bool {
    let mut config = match CollabConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return false;
        }
    };

    let changed = endpoint.is_some() || account.is_some() || public_key.is_some();
    if let Some(endpoint) = endpoint {
        config.endpoint = Some(endpoint);
    }
    if let Some(account) = account {
        config.account = Some(account);
    }
    if let Some(public_key) = public_key {
        config.public_key = Some(public_key);
    }

    if changed {
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {}", e);
            return false;
        }
        println!("Configuration saved.");
    }

    if show || !changed {
        show_config(&config);
    }
    true
}

fn show_config(config: &CollabConfig) {
    println!("draftsync Configuration");
    println!("=======================");
    println!(
        "Endpoint: {}",
        config.endpoint.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Account: {}",
        config.account.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Public key: {}",
        config.public_key.as_deref().unwrap_or("(not set)")
    );
    println!("Push debounce: {}ms", config.push_debounce_ms);
    println!("Autosave delay: {}ms", config.autosave_delay_ms);
    println!(
        "Reconnect: {} attempts, {}ms apart",
        config.max_reconnect_attempts, config.reconnect_delay_ms
    );
    println!(
        "Recovery: {} attempts, {}ms backoff unit, {}ms quiescence",
        config.recovery_budget, config.recovery_backoff_unit_ms, config.quiescence_ms
    );
    if let Some(path) = CollabConfig::config_path() {
        println!("Config file: {}", path.display());
    }
}
