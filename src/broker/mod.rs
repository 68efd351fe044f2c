pub mod angelone;
pub mod instrument_cache;
pub mod paper;
pub mod tokens;
pub mod traits;
pub mod zerodha;

pub use angelone::AngelOneClient;
pub use instrument_cache::InstrumentCache;
pub use paper::{PaperBroker, PaperBrokerSnapshot};
pub use tokens::{TokenManager, Tokens};
pub use traits::Broker;
pub use zerodha::ZerodhaClient;
