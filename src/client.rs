use once_cell::sync::Lazy;

/// Shared blocking client; cloning is cheap and reuses the connection pool.
pub static BLOCKING_CLIENT: Lazy<reqwest::blocking::Client> = Lazy::new(|| {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .user_agent(concat!("gcloudsql/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build blocking reqwest client")
});
