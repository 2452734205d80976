pub mod app;
pub mod call;
pub mod config;
pub mod directory;
pub mod handler;
pub mod notify;
pub mod preflight;
pub mod provider;
pub mod version;

// get timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    let now = std::time::SystemTime::now();
    now.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
