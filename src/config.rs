pub use self::parser::{
    AnnouncementConfig, AuthConfig, ChannelsConfig, Config, LoggingConfig, ScheduleConfig,
    StoreBackendKind, StoreConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
