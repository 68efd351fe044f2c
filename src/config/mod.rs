pub mod credentials;
pub mod loader;

pub use credentials::{detect_broker, Credentials, DetectedBroker};
pub use loader::{load_config, load_credentials, Config};
