//! Process configuration.
//!
//! Everything is read from the environment exactly once at startup and
//! frozen into a `Settings` value that gets passed to whoever needs it.

use anyhow::Context;

use crate::payment::GatewayConfig;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub frontend_url: String,
    pub payment: PaymentSettings,
    pub sms: Option<SmsSettings>,
}

#[derive(Clone, Debug)]
pub struct PaymentSettings {
    pub app_id: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub sandbox: bool,
    pub merchant_key_path: String,
    pub gateway_key_path: String,
}

#[derive(Clone, Debug)]
pub struct SmsSettings {
    pub api_key: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().context("PORT is not a valid port number")?,
            Err(_) => 8083,
        };
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port,
            nats_url: optional("NATS_URL"),
            frontend_url: optional("FRONTEND_URL").unwrap_or_else(|| "/".to_string()),
            payment: PaymentSettings {
                app_id: required("ALIPAY_APP_ID")?,
                notify_url: optional("ALIPAY_NOTIFY_URL"),
                return_url: optional("ALIPAY_RETURN_URL"),
                sandbox: optional("ALIPAY_SANDBOX").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false),
                merchant_key_path: required("ALIPAY_MERCHANT_KEY")?,
                gateway_key_path: required("ALIPAY_GATEWAY_KEY")?,
            },
            sms: optional("SMS_API_KEY").map(|api_key| SmsSettings { api_key }),
        })
    }
}

impl PaymentSettings {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            app_id: self.app_id.clone(),
            notify_url: self.notify_url.clone(),
            return_url: self.return_url.clone(),
            sandbox: self.sandbox,
        }
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
