mod settings;

pub use settings::{
    BulkSettings, CacheSettings, LogFormat, LoggingConfig, RenderSettings, Settings,
    TrackerSettings,
};
