//! SMS verification-code delivery via the Yunpian single-send API.

use serde::Deserialize;

const SINGLE_SEND_URL: &str = "https://sms.yunpian.com/v2/sms/single_send.json";

#[derive(Clone)]
pub struct SmsClient {
    api_key: String,
    http: reqwest::Client,
}

/// Provider result envelope; `code == 0` means accepted.
#[derive(Debug, Deserialize)]
pub struct SmsResult {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

impl SmsResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl SmsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), http: reqwest::Client::new() }
    }

    pub async fn send_code(&self, mobile: &str, code: &str) -> Result<SmsResult, reqwest::Error> {
        let text = format!("【FreshMall】您的验证码是{code}。如非本人操作，请忽略本短信");
        let params = [
            ("apikey", self.api_key.as_str()),
            ("mobile", mobile),
            ("text", text.as_str()),
        ];
        let response = self.http.post(SINGLE_SEND_URL).form(&params).send().await?;
        response.json::<SmsResult>().await
    }
}
