/// Adapter A: Zerodha Kite Connect. Username/password/TOTP drives a browser-
/// style login that ends in a redirect carrying a one-time request token;
/// that token is exchanged for an access token valid for the trading day.
/// Thereafter all calls are plain REST, addressed by `tradingsymbol`.
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::time::session::{is_five_minute_boundary, is_market_open};
use crate::types::{now_ist, Expiry, Instant, Instrument, Ltp, OptionBar, OptionKey, OptionType, Strike};
use crate::utils::RateLimiter;

const BASE_URL: &str = "https://api.kite.trade";
const LOGIN_URL: &str = "https://kite.zerodha.com/api/login";
const TWOFA_URL: &str = "https://kite.zerodha.com/api/twofa";
/// Kite's documented per-second ceiling for quote/historical endpoints.
const MARKET_DATA_REQUESTS_PER_SECOND: u32 = 3;

#[derive(Debug, Deserialize)]
struct LoginStepResponse {
    status: String,
    data: Option<LoginStepData>,
}

#[derive(Debug, Deserialize)]
struct LoginStepData {
    user_id: String,
    request_id: String,
}

#[derive(Debug, Serialize)]
struct SessionTokenRequest<'a> {
    api_key: &'a str,
    request_token: &'a str,
    checksum: String,
}

#[derive(Debug, Deserialize)]
struct SessionTokenEnvelope {
    status: String,
    data: Option<SessionTokenData>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionTokenData {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    status: String,
    data: Option<HashMap<String, QuoteRow>>,
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    last_price: f64,
    #[serde(default)]
    oi: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HistoricalEnvelope {
    status: String,
    data: Option<HistoricalData>,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    candles: Vec<Vec<serde_json::Value>>,
}

struct ZerodhaSession {
    access_token: String,
    issued_on: chrono::NaiveDate,
}

pub struct ZerodhaClient {
    client: Client,
    api_key: String,
    api_secret: String,
    user_id: String,
    password: String,
    totp_secret: String,
    session: Arc<RwLock<Option<ZerodhaSession>>>,
    instruments: Arc<RwLock<Vec<Instrument>>>,
    rate_limiter: RateLimiter,
}

impl ZerodhaClient {
    pub fn new(
        api_key: String,
        api_secret: String,
        user_id: String,
        password: String,
        totp_secret: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        ZerodhaClient {
            client,
            api_key,
            api_secret,
            user_id,
            password,
            totp_secret,
            session: Arc::new(RwLock::new(None)),
            instruments: Arc::new(RwLock::new(Vec::new())),
            rate_limiter: RateLimiter::new(MARKET_DATA_REQUESTS_PER_SECOND),
        }
    }

    /// `connect() -> Session`: walks the three-step login (password, TOTP,
    /// request-token exchange) and downloads the instrument master.
    pub async fn connect(&self) -> Result<()> {
        let request_token = self.login_for_request_token().await?;
        self.exchange_request_token(&request_token).await?;
        self.refresh_instruments().await?;
        Ok(())
    }

    /// Zerodha's web login does not hand back the request token directly on
    /// success; it redirects to `api_key`'s registered URL with the token as
    /// a query parameter, and fails with a 403 "TokenException" JSON body if
    /// the redirect target isn't reachable. Either way the token rides in
    /// that error/redirect rather than the 2FA response body, so it has to
    /// be pulled out of the request itself.
    async fn login_for_request_token(&self) -> Result<String> {
        info!("logging in to Zerodha (step 1/2: password)");
        let step1 = self
            .client
            .post(LOGIN_URL)
            .form(&[
                ("user_id", self.user_id.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        let body = step1.text().await?;
        let parsed: LoginStepResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::AuthenticationFailed(format!("login step 1 parse error: {}", e)))?;
        if parsed.status != "success" {
            return Err(EngineError::AuthenticationFailed(format!(
                "Zerodha login rejected: {}",
                body
            )));
        }
        let step1_data = parsed
            .data
            .ok_or_else(|| EngineError::AuthenticationFailed("no data in login step 1".into()))?;

        info!("logging in to Zerodha (step 2/2: TOTP)");
        let totp = self.generate_totp()?;
        let step2 = self
            .client
            .post(TWOFA_URL)
            .form(&[
                ("user_id", step1_data.user_id.as_str()),
                ("request_id", step1_data.request_id.as_str()),
                ("twofa_value", totp.as_str()),
            ])
            .send()
            .await?;
        let body = step2.text().await?;
        debug!("2fa response: {}", body);

        let request_token = extract_request_token_from_redirect(&body)
            .ok_or_else(|| EngineError::AuthenticationFailed("no request_token in 2FA response".into()))?;
        Ok(request_token)
    }

    async fn exchange_request_token(&self, request_token: &str) -> Result<()> {
        let checksum = {
            let mut hasher = Sha256::new();
            hasher.update(self.api_key.as_bytes());
            hasher.update(request_token.as_bytes());
            hasher.update(self.api_secret.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        let req = SessionTokenRequest {
            api_key: &self.api_key,
            request_token,
            checksum,
        };

        let response = self
            .client
            .post(format!("{}/session/token", BASE_URL))
            .form(&[
                ("api_key", req.api_key),
                ("request_token", req.request_token),
                ("checksum", req.checksum.as_str()),
            ])
            .send()
            .await?;
        let body = response.text().await?;
        let envelope: SessionTokenEnvelope = serde_json::from_str(&body)?;
        if envelope.status != "success" {
            return Err(EngineError::AuthenticationFailed(
                envelope.message.unwrap_or_else(|| "token exchange failed".into()),
            ));
        }
        let access_token = envelope
            .data
            .ok_or_else(|| EngineError::AuthenticationFailed("no access_token in response".into()))?
            .access_token;

        *self.session.write().await = Some(ZerodhaSession {
            access_token,
            issued_on: now_ist().date_naive(),
        });
        info!("Zerodha session established");
        Ok(())
    }

    fn generate_totp(&self) -> Result<String> {
        use hmac::{Hmac, Mac};
        use sha1::Sha1;
        use std::time::{SystemTime, UNIX_EPOCH};

        type HmacSha1 = Hmac<Sha1>;

        let secret = base32::decode(base32::Alphabet::RFC4648 { padding: false }, &self.totp_secret)
            .ok_or_else(|| EngineError::AuthenticationFailed("invalid TOTP secret".into()))?;
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
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

    async fn access_token(&self) -> Result<String> {
        let session = self.session.read().await;
        let session = session
            .as_ref()
            .ok_or_else(|| EngineError::TokenExpired("no Zerodha session".into()))?;
        if session.issued_on != now_ist().date_naive() {
            return Err(EngineError::TokenExpired(
                "Zerodha access token is from a prior trading day".into(),
            ));
        }
        Ok(session.access_token.clone())
    }

    async fn auth_header(&self) -> Result<String> {
        Ok(format!("token {}:{}", self.api_key, self.access_token().await?))
    }

    async fn refresh_instruments(&self) -> Result<()> {
        info!("downloading Zerodha NFO instrument master");
        let response = self
            .client
            .get(format!("{}/instruments/NFO", BASE_URL))
            .send()
            .await?;
        let body = response.text().await?;

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut instruments = Vec::new();
        for record in reader.records().flatten() {
            if record.len() < 10 {
                continue;
            }
            if !record.get(2).unwrap_or("").starts_with("NIFTY") {
                continue;
            }
            instruments.push(Instrument {
                token: record.get(0).unwrap_or_default().to_string(),
                symbol: record.get(2).unwrap_or_default().to_string(),
                name: record.get(2).unwrap_or_default().to_string(),
                expiry: record.get(5).unwrap_or_default().to_string(),
                strike: record.get(6).and_then(|s| s.parse().ok()).unwrap_or(0.0),
                lotsize: record.get(8).and_then(|s| s.parse().ok()).unwrap_or(75),
                instrument_type: record.get(9).unwrap_or_default().to_string(),
                exch_seg: "NFO".to_string(),
                tick_size: record.get(7).and_then(|s| s.parse().ok()).unwrap_or(0.05),
            });
        }
        *self.instruments.write().await = instruments;
        Ok(())
    }

    async fn tradingsymbol_for(&self, option_key: OptionKey) -> Result<String> {
        let instruments = self.instruments.read().await;
        let suffix = option_key.option_type.as_str();
        instruments
            .iter()
            .find(|i| {
                i.strike as i64 == option_key.strike
                    && i.symbol.ends_with(suffix)
                    && chrono::NaiveDate::parse_from_str(&i.expiry, "%Y-%m-%d")
                        .map(|d| d == option_key.expiry)
                        .unwrap_or(false)
            })
            .map(|i| format!("NFO:{}", i.symbol))
            .ok_or_else(|| EngineError::InstrumentNotFound(option_key.label()))
    }

    pub async fn get_spot_price(&self) -> Result<f64> {
        let header = self.auth_header().await?;
        self.rate_limiter.acquire().await;
        let response = self
            .client
            .get(format!("{}/quote/ltp", BASE_URL))
            .header("Authorization", header)
            .query(&[("i", "NSE:NIFTY 50")])
            .send()
            .await?;
        let body = response.text().await?;
        let envelope: QuoteEnvelope = serde_json::from_str(&body)?;
        let data = envelope.data.ok_or_else(|| EngineError::MissingLtp("NIFTY 50".into()))?;
        data.get("NSE:NIFTY 50")
            .map(|r| r.last_price)
            .ok_or_else(|| EngineError::MissingLtp("NIFTY 50".into()))
    }

    pub async fn get_ltp(&self, option_key: OptionKey) -> Result<Ltp> {
        let symbol = self.tradingsymbol_for(option_key).await?;
        let header = self.auth_header().await?;
        self.rate_limiter.acquire().await;
        let response = self
            .client
            .get(format!("{}/quote", BASE_URL))
            .header("Authorization", header)
            .query(&[("i", symbol.as_str())])
            .send()
            .await?;
        let body = response.text().await?;
        let envelope: QuoteEnvelope = serde_json::from_str(&body)?;
        let data = envelope.data.ok_or_else(|| EngineError::MissingLtp(symbol.clone()))?;
        let row = data.get(&symbol).ok_or_else(|| EngineError::MissingLtp(symbol.clone()))?;
        Ok(Ltp {
            timestamp: now_ist(),
            price: row.last_price,
        })
    }

    pub async fn get_five_minute_candle(
        &self,
        option_key: OptionKey,
        range_ending_now: Instant,
    ) -> Result<OptionBar> {
        let symbol = self.tradingsymbol_for(option_key).await?;
        let token = symbol.trim_start_matches("NFO:").to_string();
        let instrument_token = {
            let instruments = self.instruments.read().await;
            instruments
                .iter()
                .find(|i| i.symbol == token)
                .map(|i| i.token.clone())
                .ok_or_else(|| EngineError::InstrumentNotFound(token.clone()))?
        };

        let header = self.auth_header().await?;
        let from = range_ending_now - chrono::Duration::minutes(5);
        self.rate_limiter.acquire().await;
        let response = self
            .client
            .get(format!(
                "{}/instruments/historical/{}/5minute",
                BASE_URL, instrument_token
            ))
            .header("Authorization", header)
            .query(&[
                ("from", from.format("%Y-%m-%d %H:%M:%S").to_string()),
                ("to", range_ending_now.format("%Y-%m-%d %H:%M:%S").to_string()),
                ("oi", "1".to_string()),
            ])
            .send()
            .await?;

        let body = response.text().await?;
        let envelope: HistoricalEnvelope = serde_json::from_str(&body)?;
        let data = envelope
            .data
            .ok_or_else(|| EngineError::MissingBar(instrument_token.clone()))?;
        let last = data
            .candles
            .last()
            .ok_or_else(|| EngineError::MissingBar(instrument_token.clone()))?;

        let ts_str = last[0].as_str().unwrap_or_default();
        let naive = NaiveDateTime::parse_from_str(&ts_str[..19], "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| EngineError::MissingBar(format!("bad candle timestamp: {}", e)))?;
        let timestamp = chrono::TimeZone::from_utc_datetime(&chrono_tz::Asia::Kolkata, &naive);

        Ok(OptionBar {
            timestamp,
            open: last[1].as_f64().unwrap_or_default(),
            high: last[2].as_f64().unwrap_or_default(),
            low: last[3].as_f64().unwrap_or_default(),
            close: last[4].as_f64().unwrap_or_default(),
            volume: last.get(5).and_then(|v| v.as_u64()),
            open_interest: last.get(6).and_then(|v| v.as_u64()),
        })
    }

    pub async fn get_options_chain(
        &self,
        expiry: Expiry,
        strikes: &[Strike],
    ) -> Result<Vec<(OptionKey, OptionBar)>> {
        let now = now_ist();
        let mut bars = Vec::with_capacity(strikes.len() * 2);
        for &strike in strikes {
            for option_type in [OptionType::Ce, OptionType::Pe] {
                let key = OptionKey::new(strike, option_type, expiry);
                if let Ok(bar) = self.get_five_minute_candle(key, now).await {
                    bars.push((key, bar));
                }
            }
        }
        Ok(bars)
    }

    pub async fn get_next_expiry(&self) -> Result<Expiry> {
        let instruments = self.instruments.read().await;
        instruments
            .iter()
            .filter_map(|i| chrono::NaiveDate::parse_from_str(&i.expiry, "%Y-%m-%d").ok())
            .filter(|d| *d >= now_ist().date_naive())
            .min()
            .ok_or_else(|| EngineError::CacheMissing("no upcoming NIFTY expiry found".into()))
    }

    pub fn is_market_open(&self) -> bool {
        is_market_open(now_ist())
    }

    pub async fn wait_until_next_five_minute_boundary(&self) {
        loop {
            if is_five_minute_boundary(now_ist()) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    }

    pub async fn logout(&self) {
        *self.session.write().await = None;
        warn!("Zerodha session cleared");
    }
}

/// Zerodha's 2FA success redirects the browser to
/// `<redirect_url>?request_token=...&action=login&status=success`; a
/// failure to deliver that redirect surfaces a `TokenException` JSON body
/// with the same token buried in its `data.url` for retry flows that follow
/// the Location header instead. Accept either shape.
fn extract_request_token_from_redirect(body: &str) -> Option<String> {
    if let Some(idx) = body.find("request_token=") {
        let rest = &body[idx + "request_token=".len()..];
        let end = rest.find(['&', '"', '\'']).unwrap_or(rest.len());
        return Some(rest[..end].to_string());
    }
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("data")?
        .get("url")?
        .as_str()
        .and_then(|url| url.split("request_token=").nth(1))
        .map(|s| s.split('&').next().unwrap_or(s).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_request_token_from_query_string() {
        let body = r#"{"status":"error","data":{"url":"https://example.com/cb?request_token=abc123&action=login&status=success"}}"#;
        assert_eq!(
            extract_request_token_from_redirect(body),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn extracts_request_token_from_direct_redirect_echo() {
        let body = "request_token=xyz789&action=login&status=success";
        assert_eq!(
            extract_request_token_from_redirect(body),
            Some("xyz789".to_string())
        );
    }

    #[test]
    fn missing_token_returns_none() {
        assert_eq!(extract_request_token_from_redirect("{}"), None);
    }
}
