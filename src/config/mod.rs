mod settings;

pub use settings::{
    ConsumerConfig, DemoConfig, LogConfig, LogFormat, RedisConfig, Settings, TopicConfig,
};
