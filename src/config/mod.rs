pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    BrokerConfig, Config, DirectConfig, GenerationConfig, LimitsConfig, MazeConfig,
    TransportConfig, TransportKind,
};
