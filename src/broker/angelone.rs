/// Adapter B: AngelOne SmartAPI. TOTP-authenticated session; an instrument
/// master JSON downloaded once at session start supplies the token mapping;
/// candle data carries no OI, so OI is read back through the quote endpoint.
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::instrument_cache::InstrumentCache;
use crate::broker::tokens::{TokenManager, Tokens};
use crate::error::{EngineError, Result};
use crate::time::session::{is_market_open, is_five_minute_boundary};
use crate::types::{now_ist, Expiry, Instant, Ltp, OptionBar, OptionKey, Strike};
use crate::utils::RateLimiter;

const BASE_URL: &str = "https://apiconnect.angelbroking.com";
/// SmartAPI's documented per-second ceiling for quote/historical endpoints.
const MARKET_DATA_REQUESTS_PER_SECOND: u32 = 3;

#[derive(Debug, Serialize)]
struct LoginRequest {
    #[serde(rename = "clientcode")]
    client_code: String,
    password: String,
    totp: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: bool,
    message: String,
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(rename = "jwtToken")]
    jwt_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    #[serde(rename = "feedToken")]
    feed_token: String,
}

#[derive(Debug, Serialize)]
struct CandleRequest {
    exchange: String,
    #[serde(rename = "symboltoken")]
    symbol_token: String,
    interval: String,
    #[serde(rename = "fromdate")]
    from_date: String,
    #[serde(rename = "todate")]
    to_date: String,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    status: bool,
    message: String,
    data: Option<Vec<Vec<serde_json::Value>>>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    status: bool,
    message: String,
    data: Option<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    fetched: Vec<QuoteRow>,
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    #[serde(rename = "symbolToken")]
    symbol_token: String,
    ltp: f64,
    #[serde(rename = "opnInterest")]
    open_interest: Option<f64>,
}

/// AngelOne SmartAPI client; the broker adapter seen by the runner.
pub struct AngelOneClient {
    client: Client,
    token_manager: Arc<TokenManager>,
    instrument_cache: Arc<InstrumentCache>,
    client_code: String,
    password: String,
    totp_secret: String,
    rate_limiter: RateLimiter,
}

impl AngelOneClient {
    pub fn new(
        token_manager: Arc<TokenManager>,
        instrument_cache: Arc<InstrumentCache>,
        client_code: String,
        password: String,
        totp_secret: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        AngelOneClient {
            client,
            token_manager,
            instrument_cache,
            client_code,
            password,
            totp_secret,
            rate_limiter: RateLimiter::new(MARKET_DATA_REQUESTS_PER_SECOND),
        }
    }

    /// `connect() -> Session`: logs in, then primes the instrument cache.
    pub async fn connect(&self) -> Result<()> {
        self.login().await?;
        if self.instrument_cache.needs_refresh().await {
            self.instrument_cache.refresh().await?;
        }
        Ok(())
    }

    async fn login(&self) -> Result<Tokens> {
        info!("logging in to AngelOne");
        let totp = self.generate_totp()?;

        let login_req = LoginRequest {
            client_code: self.client_code.clone(),
            password: self.password.clone(),
            totp,
        };

        let response = self
            .client
            .post(format!(
                "{}/rest/auth/angelbroking/user/v1/loginByPassword",
                BASE_URL
            ))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&login_req)
            .send()
            .await?;

        let body = response.text().await?;
        debug!("login response: {}", body);

        let login_response: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::AuthenticationFailed(format!("parse error: {}", e)))?;

        if !login_response.status {
            return Err(EngineError::AuthenticationFailed(login_response.message));
        }

        let data = login_response
            .data
            .ok_or_else(|| EngineError::AuthenticationFailed("no data in login response".into()))?;

        let expiry = Self::calculate_token_expiry(Utc::now());
        let tokens = Tokens {
            jwt_token: data.jwt_token,
            feed_token: data.feed_token,
            jwt_expiry: expiry,
            feed_expiry: expiry,
            refresh_token: Some(data.refresh_token),
        };

        self.token_manager.set_tokens(tokens.clone()).await?;
        info!("AngelOne login successful, tokens expire at: {}", expiry);
        Ok(tokens)
    }

    /// AngelOne sessions expire at 03:30 IST the next day.
    fn calculate_token_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
        use chrono::TimeZone;
        use chrono_tz::Asia::Kolkata;

        let now_ist = now.with_timezone(&Kolkata);
        let today_330 = Kolkata
            .with_ymd_and_hms(now_ist.year(), now_ist.month(), now_ist.day(), 3, 30, 0)
            .unwrap();
        let expiry_ist = if now_ist < today_330 {
            today_330
        } else {
            today_330 + chrono::Duration::days(1)
        };
        expiry_ist.with_timezone(&Utc)
    }

    fn generate_totp(&self) -> Result<String> {
        use hmac::{Hmac, Mac};
        use sha1::Sha1;
        use std::time::{SystemTime, UNIX_EPOCH};

        type HmacSha1 = Hmac<Sha1>;

        let secret = base32::decode(base32::Alphabet::RFC4648 { padding: false }, &self.totp_secret)
            .ok_or_else(|| EngineError::AuthenticationFailed("invalid TOTP secret".into()))?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let time_step = timestamp / 30;

        let mut mac = HmacSha1::new_from_slice(&secret)
            .map_err(|e| EngineError::AuthenticationFailed(format!("HMAC error: {}", e)))?;
        mac.update(&time_step.to_be_bytes());
        let hash = mac.finalize().into_bytes();

        let offset = (hash[hash.len() - 1] & 0x0f) as usize;
        let code = u32::from_be_bytes([
            hash[offset] & 0x7f,
            hash[offset + 1],
            hash[offset + 2],
            hash[offset + 3],
        ]);

        Ok(format!("{:06}", code % 1_000_000))
    }

    async fn jwt(&self) -> Result<String> {
        self.token_manager
            .get_tokens()
            .await
            .map(|t| t.jwt_token)
            .ok_or_else(|| EngineError::TokenExpired("no AngelOne session".into()))
    }

    pub async fn get_spot_price(&self) -> Result<f64> {
        let token = self.instrument_cache.get_nifty_token().await?;
        self.quote_ltp(&token).await
    }

    pub async fn get_ltp(&self, option_key: OptionKey) -> Result<Ltp> {
        let (token, _symbol) = self
            .instrument_cache
            .find_option_token("NIFTY", option_key.strike, option_key.option_type, Some(option_key.expiry))
            .await?;
        let price = self.quote_ltp(&token).await?;
        Ok(Ltp {
            timestamp: now_ist(),
            price,
        })
    }

    async fn quote_ltp(&self, symbol_token: &str) -> Result<f64> {
        let jwt = self.jwt().await?;
        let payload = serde_json::json!({
            "exchange": "NFO",
            "symboltoken": symbol_token,
            "tradingsymbol": ""
        });

        self.rate_limiter.acquire().await;
        let response = self
            .client
            .post(format!("{}/rest/secure/angelbroking/order/v1/getLtpData", BASE_URL))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let body = response.text().await?;
        let parsed: QuoteResponse = serde_json::from_str(&body)?;
        if !parsed.status {
            return Err(EngineError::BrokerApi {
                code: "LTP".into(),
                message: parsed.message,
            });
        }
        let row = parsed
            .data
            .ok_or_else(|| EngineError::MissingLtp(symbol_token.to_string()))?
            .fetched
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::MissingLtp(symbol_token.to_string()))?;
        Ok(row.ltp)
    }

    pub async fn get_five_minute_candle(
        &self,
        option_key: OptionKey,
        range_ending_now: Instant,
    ) -> Result<OptionBar> {
        let jwt = self.jwt().await?;
        let (token, _symbol) = self
            .instrument_cache
            .find_option_token("NIFTY", option_key.strike, option_key.option_type, Some(option_key.expiry))
            .await?;

        let from = range_ending_now - chrono::Duration::minutes(5);
        let req = CandleRequest {
            exchange: "NFO".into(),
            symbol_token: token.clone(),
            interval: "FIVE_MINUTE".into(),
            from_date: from.format("%Y-%m-%d %H:%M").to_string(),
            to_date: range_ending_now.format("%Y-%m-%d %H:%M").to_string(),
        };

        self.rate_limiter.acquire().await;
        let response = self
            .client
            .post(format!(
                "{}/rest/secure/angelbroking/historical/v1/getCandleData",
                BASE_URL
            ))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await?;

        let body = response.text().await?;
        let parsed: CandleResponse = serde_json::from_str(&body)?;
        if !parsed.status {
            return Err(EngineError::MissingBar(format!(
                "candle fetch failed for {}: {}",
                token, parsed.message
            )));
        }

        let rows = parsed
            .data
            .ok_or_else(|| EngineError::MissingBar(token.clone()))?;
        let last = rows.last().ok_or_else(|| EngineError::MissingBar(token.clone()))?;

        let ts_str = last[0]
            .as_str()
            .unwrap_or_default()
            .replace("+05:30", "")
            .trim()
            .to_string();
        let naive = NaiveDateTime::parse_from_str(&ts_str, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| EngineError::MissingBar(format!("bad candle timestamp: {}", e)))?;
        let timestamp = chrono::TimeZone::from_utc_datetime(&chrono_tz::Asia::Kolkata, &naive);

        let open_interest = self.quote_oi(&token).await.ok();

        Ok(OptionBar {
            timestamp,
            open: last[1].as_f64().unwrap_or_default(),
            high: last[2].as_f64().unwrap_or_default(),
            low: last[3].as_f64().unwrap_or_default(),
            close: last[4].as_f64().unwrap_or_default(),
            volume: last.get(5).and_then(|v| v.as_u64()),
            open_interest,
        })
    }

    async fn quote_oi(&self, symbol_token: &str) -> Result<u64> {
        let jwt = self.jwt().await?;
        let payload = serde_json::json!({
            "mode": "FULL",
            "exchangeTokens": { "NFO": [symbol_token] }
        });

        self.rate_limiter.acquire().await;
        let response = self
            .client
            .post(format!("{}/rest/secure/angelbroking/market/v1/quote", BASE_URL))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let body = response.text().await?;
        let parsed: QuoteResponse = serde_json::from_str(&body)?;
        let row = parsed
            .data
            .ok_or_else(|| EngineError::MissingLtp(symbol_token.to_string()))?
            .fetched
            .into_iter()
            .find(|r| r.symbol_token == symbol_token)
            .ok_or_else(|| EngineError::MissingLtp(symbol_token.to_string()))?;
        Ok(row.open_interest.unwrap_or(0.0) as u64)
    }

    pub async fn get_options_chain(
        &self,
        expiry: Expiry,
        strikes: &[Strike],
    ) -> Result<Vec<(OptionKey, OptionBar)>> {
        let now = now_ist();
        let mut bars = Vec::with_capacity(strikes.len() * 2);
        for &strike in strikes {
            for option_type in [crate::types::OptionType::Ce, crate::types::OptionType::Pe] {
                let key = OptionKey::new(strike, option_type, expiry);
                if let Ok(bar) = self.get_five_minute_candle(key, now).await {
                    bars.push((key, bar));
                }
            }
        }
        Ok(bars)
    }

    pub async fn get_next_expiry(&self) -> Result<Expiry> {
        let chain = self.instrument_cache.get_nifty_options_chain(None).await;
        chain
            .into_iter()
            .filter_map(|i| chrono::NaiveDate::parse_from_str(&i.expiry, "%d%b%Y").ok())
            .filter(|d| *d >= now_ist().date_naive())
            .min()
            .ok_or_else(|| EngineError::CacheMissing("no upcoming NIFTY expiry found".into()))
    }

    pub fn is_market_open(&self) -> bool {
        is_market_open(now_ist())
    }

    pub async fn wait_until_next_five_minute_boundary(&self) {
        loop {
            let now = now_ist();
            if is_five_minute_boundary(now) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    }

    pub async fn logout(&self) {
        self.token_manager.clear().await;
        warn!("AngelOne session cleared");
    }
}
