mod loader;

pub use loader::{
    load_config, resolve_config_path, ApiDiffConfig, AuthSettings, AuthStyle, HostEntry,
    LoadedConfig, CONFIG_FILE_ENV_VARIABLE,
};
