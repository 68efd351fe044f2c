/// The broker capability contract is modeled as a closed sum of concrete
/// adapters rather than a `dyn` trait object or an `async_trait`-boxed
/// hierarchy: the runner only ever holds one connected adapter at a time,
/// so a match-delegating enum is enough and keeps every call monomorphic.
use std::sync::Arc;

use crate::broker::angelone::AngelOneClient;
use crate::broker::instrument_cache::InstrumentCache;
use crate::broker::tokens::TokenManager;
use crate::broker::zerodha::ZerodhaClient;
use crate::config::credentials::{detect_broker, DetectedBroker};
use crate::config::Credentials;
use crate::error::{EngineError, Result};
use crate::types::{Expiry, Instant, Ltp, OptionBar, OptionKey, Strike};

pub enum Broker {
    Zerodha(ZerodhaClient),
    AngelOne(AngelOneClient),
}

impl Broker {
    /// Picks the adapter per the credentials shape (see
    /// `config::credentials::detect_broker`) and builds it.
    pub fn from_credentials(credentials: &Credentials, token_file_path: String) -> Result<Self> {
        Self::from_credentials_with_override(None, credentials, token_file_path)
    }

    /// Same as `from_credentials`, but `forced` overrides auto-detection
    /// when the caller already knows which adapter it wants (the CLI's
    /// `--broker zerodha|angelone` flag).
    pub fn from_credentials_with_override(
        forced: Option<DetectedBroker>,
        credentials: &Credentials,
        token_file_path: String,
    ) -> Result<Self> {
        match forced.or_else(|| detect_broker(credentials)) {
            Some(DetectedBroker::Zerodha) => {
                let api_key = credentials.api_key.clone().ok_or_else(|| {
                    EngineError::Config("zerodha credentials missing api_key".into())
                })?;
                let api_secret = credentials
                    .api_secret
                    .clone()
                    .ok_or_else(|| EngineError::Config("zerodha credentials missing api_secret".into()))?;
                Ok(Broker::Zerodha(ZerodhaClient::new(
                    api_key,
                    api_secret,
                    credentials.user_id.clone().unwrap_or_default(),
                    credentials.password.clone().unwrap_or_default(),
                    credentials.totp_secret.clone().unwrap_or_default(),
                )))
            }
            Some(DetectedBroker::AngelOne) => {
                let totp_secret = credentials
                    .totp_token
                    .clone()
                    .ok_or_else(|| EngineError::Config("angelone credentials missing totp_token".into()))?;
                let token_manager = Arc::new(TokenManager::new(token_file_path));
                let instrument_cache = Arc::new(InstrumentCache::new());
                Ok(Broker::AngelOne(AngelOneClient::new(
                    token_manager,
                    instrument_cache,
                    credentials.client_code.clone().unwrap_or_default(),
                    credentials.password.clone().unwrap_or_default(),
                    totp_secret,
                )))
            }
            None => Err(EngineError::Config(
                "credentials match neither Zerodha (api_secret) nor AngelOne (totp_token) shape"
                    .into(),
            )),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        match self {
            Broker::Zerodha(c) => c.connect().await,
            Broker::AngelOne(c) => c.connect().await,
        }
    }

    pub async fn get_spot_price(&self) -> Result<f64> {
        match self {
            Broker::Zerodha(c) => c.get_spot_price().await,
            Broker::AngelOne(c) => c.get_spot_price().await,
        }
    }

    pub async fn get_ltp(&self, option_key: OptionKey) -> Result<Ltp> {
        match self {
            Broker::Zerodha(c) => c.get_ltp(option_key).await,
            Broker::AngelOne(c) => c.get_ltp(option_key).await,
        }
    }

    pub async fn get_five_minute_candle(
        &self,
        option_key: OptionKey,
        range_ending_now: Instant,
    ) -> Result<OptionBar> {
        match self {
            Broker::Zerodha(c) => c.get_five_minute_candle(option_key, range_ending_now).await,
            Broker::AngelOne(c) => c.get_five_minute_candle(option_key, range_ending_now).await,
        }
    }

    pub async fn get_options_chain(
        &self,
        expiry: Expiry,
        strikes: &[Strike],
    ) -> Result<Vec<(OptionKey, OptionBar)>> {
        match self {
            Broker::Zerodha(c) => c.get_options_chain(expiry, strikes).await,
            Broker::AngelOne(c) => c.get_options_chain(expiry, strikes).await,
        }
    }

    pub async fn get_next_expiry(&self) -> Result<Expiry> {
        match self {
            Broker::Zerodha(c) => c.get_next_expiry().await,
            Broker::AngelOne(c) => c.get_next_expiry().await,
        }
    }

    pub fn is_market_open(&self) -> bool {
        match self {
            Broker::Zerodha(c) => c.is_market_open(),
            Broker::AngelOne(c) => c.is_market_open(),
        }
    }

    pub async fn wait_until_next_five_minute_boundary(&self) {
        match self {
            Broker::Zerodha(c) => c.wait_until_next_five_minute_boundary().await,
            Broker::AngelOne(c) => c.wait_until_next_five_minute_boundary().await,
        }
    }

    pub async fn logout(&self) {
        match self {
            Broker::Zerodha(c) => c.logout().await,
            Broker::AngelOne(c) => c.logout().await,
        }
    }
}
