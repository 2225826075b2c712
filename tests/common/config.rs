//! Test configuration builders

use std::path::Path;
use std::time::Duration;
use tree_sync::{Config, RemoteConfig, SourceConfig};

/// Configuration with one source per name on a single remote, rooted in `workdir`
pub fn local_config(workdir: &Path, sources: &[&str]) -> Config {
    let mut config = Config::default();
    config.settings.destination_dir = workdir.join("downloads");
    config.settings.metadata_path = workdir.join("metadata.json");
    config.settings.completion_wait = Duration::from_millis(100);
    config.settings.progress_interval = Duration::from_secs(3600);

    for source in sources {
        config.sources.insert(
            source.to_string(),
            SourceConfig {
                remote_name: "local".to_string(),
                remote_path: String::new(),
            },
        );
    }
    config.remotes.insert(
        "local".to_string(),
        RemoteConfig {
            max_concurrent_downloads: 2,
        },
    );
    config
}
