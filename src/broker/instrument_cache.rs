/// Instrument cache for fast token lookups (Adapter B / AngelOne).
///
/// AngelOne's REST API addresses contracts by numeric token, not by the
/// `OptionKey` the core speaks in; this cache is the adapter-private
/// translation layer between the two, built once from the downloaded
/// instrument master and refreshed daily. It owns its own HTTP client
/// rather than borrowing the adapter's, since the adapter in turn holds
/// this cache to resolve tokens for its quote/candle calls.
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::types::{Instrument, OptionType};

const SCRIP_MASTER_URL: &str =
    "https://margincalculator.angelbroking.com/OpenAPI_File/files/OpenAPIScripMaster.json";

pub struct InstrumentCache {
    client: Client,
    instruments: Arc<RwLock<Vec<Instrument>>>,
    token_map: Arc<RwLock<HashMap<String, Instrument>>>,
    last_updated: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl InstrumentCache {
    pub fn new() -> Self {
        InstrumentCache {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
            instruments: Arc::new(RwLock::new(Vec::new())),
            token_map: Arc::new(RwLock::new(HashMap::new())),
            last_updated: Arc::new(RwLock::new(None)),
        }
    }

    async fn download_instrument_master(&self) -> Result<Vec<Instrument>> {
        let response = self.client.get(SCRIP_MASTER_URL).send().await?;
        let body = response.text().await?;

        #[derive(Debug, Deserialize)]
        struct RawInstrument {
            token: String,
            symbol: String,
            name: String,
            expiry: String,
            strike: String,
            lotsize: String,
            instrumenttype: String,
            exch_seg: String,
            tick_size: String,
        }

        let raw: Vec<RawInstrument> = serde_json::from_str(&body)?;
        Ok(raw
            .into_iter()
            .filter_map(|r| {
                Some(Instrument {
                    token: r.token,
                    symbol: r.symbol,
                    name: r.name,
                    expiry: r.expiry,
                    strike: r.strike.parse::<f64>().ok()? / 100.0,
                    lotsize: r.lotsize.parse().ok()?,
                    instrument_type: r.instrumenttype,
                    exch_seg: r.exch_seg,
                    tick_size: r.tick_size.parse().unwrap_or(0.05),
                })
            })
            .collect())
    }

    pub async fn refresh(&self) -> Result<()> {
        info!("downloading instrument master");
        let instruments = self.download_instrument_master().await?;

        let mut token_map = HashMap::new();
        for inst in &instruments {
            token_map.insert(inst.symbol.clone(), inst.clone());
            token_map.insert(inst.token.clone(), inst.clone());
        }

        *self.instruments.write().await = instruments.clone();
        *self.token_map.write().await = token_map;
        *self.last_updated.write().await = Some(Utc::now());

        info!("instrument master cached: {} instruments", instruments.len());
        Ok(())
    }

    pub async fn get_nifty_token(&self) -> Result<String> {
        let instruments = self.instruments.read().await;
        let nifty = instruments
            .iter()
            .find(|i| i.name == "NIFTY" && i.instrument_type == "OPTIDX")
            .or_else(|| {
                instruments
                    .iter()
                    .find(|i| i.symbol.starts_with("NIFTY") && i.instrument_type == "INDEX")
            })
            .ok_or_else(|| EngineError::InstrumentNotFound("NIFTY not found".to_string()))?;
        Ok(nifty.token.clone())
    }

    /// Find the instrument token + tradingsymbol for a given strike/type,
    /// optionally constrained to a specific expiry (nearest expiry chosen
    /// otherwise).
    pub async fn find_option_token(
        &self,
        underlying: &str,
        strike: i64,
        option_type: OptionType,
        expiry: Option<NaiveDate>,
    ) -> Result<(String, String)> {
        let instruments = self.instruments.read().await;

        let mut candidates: Vec<&Instrument> = instruments
            .iter()
            .filter(|i| {
                i.name == underlying
                    && i.strike as i64 == strike
                    && i.exch_seg == "NFO"
                    && i.symbol.ends_with(option_type.as_str())
            })
            .collect();

        if candidates.is_empty() {
            return Err(EngineError::InstrumentNotFound(format!(
                "no option found: {} {} {}",
                underlying,
                strike,
                option_type.as_str()
            )));
        }

        if let Some(target_expiry) = expiry {
            candidates.retain(|i| {
                NaiveDate::parse_from_str(&i.expiry, "%d%b%Y")
                    .map(|d| d == target_expiry)
                    .unwrap_or(false)
            });
        } else {
            candidates.sort_by_key(|i| i.expiry.clone());
        }

        let instrument = candidates.first().ok_or_else(|| {
            EngineError::InstrumentNotFound(format!(
                "no matching expiry: {} {} {}",
                underlying,
                strike,
                option_type.as_str()
            ))
        })?;

        Ok((instrument.token.clone(), instrument.symbol.clone()))
    }

    pub async fn get_by_token(&self, token: &str) -> Option<Instrument> {
        self.token_map.read().await.get(token).cloned()
    }

    pub async fn get_by_symbol(&self, symbol: &str) -> Option<Instrument> {
        self.token_map.read().await.get(symbol).cloned()
    }

    /// All NIFTY option contracts, optionally filtered to one expiry,
    /// sorted by strike — the raw material for `getOptionsChain`.
    pub async fn get_nifty_options_chain(&self, expiry: Option<NaiveDate>) -> Vec<Instrument> {
        let instruments = self.instruments.read().await;
        let mut options: Vec<Instrument> = instruments
            .iter()
            .filter(|i| i.name == "NIFTY" && i.exch_seg == "NFO")
            .cloned()
            .collect();

        if let Some(target_expiry) = expiry {
            options.retain(|i| {
                NaiveDate::parse_from_str(&i.expiry, "%d%b%Y")
                    .map(|d| d == target_expiry)
                    .unwrap_or(false)
            });
        }

        options.sort_by_key(|i| i.strike as i64);
        options
    }

    pub async fn needs_refresh(&self) -> bool {
        match *self.last_updated.read().await {
            None => true,
            Some(last) => (Utc::now() - last).num_hours() >= 24,
        }
    }

    pub async fn size(&self) -> usize {
        self.instruments.read().await.len()
    }
}
