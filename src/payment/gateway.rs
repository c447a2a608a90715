//! Gateway client: RSA2 request signing and callback verification.

use std::collections::HashMap;
use std::path::Path;

use chrono::Local;
use data_encoding::BASE64;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use super::{canonical, PaymentError};

const GATEWAY_PROD: &str = "https://openapi.alipay.com/gateway.do";
const GATEWAY_SANDBOX: &str = "https://openapi.alipaydev.com/gateway.do";
const METHOD_PAGE_PAY: &str = "alipay.trade.page.pay";
const PRODUCT_CODE: &str = "FAST_INSTANT_TRADE_PAY";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Immutable per-merchant configuration, built once at startup.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub app_id: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub sandbox: bool,
}

/// Holds the merchant private key (outbound signing) and the gateway
/// public key (inbound verification). Read-only after construction, so
/// a single instance is shared across request handlers.
#[derive(Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    merchant_key: PKey<Private>,
    gateway_key: PKey<Public>,
}

impl GatewayClient {
    pub fn from_pem_files(
        config: GatewayConfig,
        merchant_key_path: impl AsRef<Path>,
        gateway_key_path: impl AsRef<Path>,
    ) -> Result<Self, PaymentError> {
        let merchant_pem = std::fs::read(merchant_key_path)?;
        let gateway_pem = std::fs::read(gateway_key_path)?;
        Self::from_pem(config, &merchant_pem, &gateway_pem)
    }

    pub fn from_pem(
        config: GatewayConfig,
        merchant_pem: &[u8],
        gateway_pem: &[u8],
    ) -> Result<Self, PaymentError> {
        let rsa = Rsa::private_key_from_pem(merchant_pem).map_err(PaymentError::InvalidKey)?;
        let merchant_key = PKey::from_rsa(rsa).map_err(PaymentError::InvalidKey)?;
        let gateway_key =
            PKey::public_key_from_pem(gateway_pem).map_err(PaymentError::InvalidKey)?;
        Ok(Self { config, merchant_key, gateway_key })
    }

    pub fn gateway_base(&self) -> &'static str {
        if self.config.sandbox {
            GATEWAY_SANDBOX
        } else {
            GATEWAY_PROD
        }
    }

    /// Build the full redirect URL for a page-pay request. Pure; no
    /// network call happens here.
    pub fn page_pay(
        &self,
        subject: &str,
        out_trade_no: &str,
        amount: Decimal,
        extra: Map<String, Value>,
    ) -> Result<String, PaymentError> {
        let mut biz_content = Map::new();
        biz_content.insert("subject".into(), json!(subject));
        biz_content.insert("out_trade_no".into(), json!(out_trade_no));
        biz_content.insert("total_amount".into(), json!(format!("{amount:.2}")));
        biz_content.insert("product_code".into(), json!(PRODUCT_CODE));
        biz_content.extend(extra);

        let body = self.build_body(METHOD_PAGE_PAY, Value::Object(biz_content));
        let query = self.sign_params(body)?;
        Ok(format!("{}?{}", self.gateway_base(), query))
    }

    fn build_body(&self, method: &str, biz_content: Value) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("app_id".into(), json!(self.config.app_id));
        data.insert("method".into(), json!(method));
        data.insert("charset".into(), json!("utf-8"));
        data.insert("sign_type".into(), json!("RSA2"));
        data.insert(
            "timestamp".into(),
            json!(Local::now().format(TIMESTAMP_FORMAT).to_string()),
        );
        data.insert("version".into(), json!("1.0"));
        data.insert("biz_content".into(), biz_content);
        if let Some(url) = &self.config.notify_url {
            data.insert("notify_url".into(), json!(url));
        }
        if let Some(url) = &self.config.return_url {
            data.insert("return_url".into(), json!(url));
        }
        data
    }

    /// Sign a parameter map and return the percent-encoded query string
    /// with the signature appended as the final `sign` field. A stale
    /// `sign` entry is dropped before the canonical string is built.
    pub fn sign_params(&self, mut params: Map<String, Value>) -> Result<String, PaymentError> {
        params.remove("sign");
        let unsigned = canonical::canonical(&params)?;
        let signature = self.sign(unsigned.as_bytes())?;
        let quoted = canonical::canonical_quoted(&params)?;
        Ok(format!("{}&sign={}", quoted, canonical::quote(&signature)))
    }

    fn sign(&self, message: &[u8]) -> Result<String, PaymentError> {
        let mut signer =
            Signer::new(MessageDigest::sha256(), &self.merchant_key).map_err(PaymentError::Signing)?;
        signer.update(message).map_err(PaymentError::Signing)?;
        let signature = signer.sign_to_vec().map_err(PaymentError::Signing)?;
        Ok(BASE64.encode(&signature))
    }

    /// Check an inbound parameter set against its detached signature.
    ///
    /// `sign` and `sign_type` are metadata about the signature, not
    /// signed content, and are excluded from the canonical string. Any
    /// decode or crypto failure is a negative trust decision, never an
    /// error: a forged callback is expected adversarial input.
    pub fn verify(&self, params: &HashMap<String, String>, signature: &str) -> bool {
        let message = canonical::canonical_pairs(
            params
                .iter()
                .filter(|(k, _)| k.as_str() != "sign" && k.as_str() != "sign_type")
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        // Some gateways line-wrap the base64 signature.
        let compact: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = match BASE64.decode(compact.as_bytes()) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        let mut verifier = match Verifier::new(MessageDigest::sha256(), &self.gateway_key) {
            Ok(v) => v,
            Err(_) => return false,
        };
        if verifier.update(message.as_bytes()).is_err() {
            return false;
        }
        verifier.verify(&raw).unwrap_or(false)
    }

    /// Verify a callback as delivered: the signature rides inside the
    /// parameter set. A missing `sign` field is malformed input and
    /// rejects deterministically.
    pub fn verify_callback(&self, mut params: HashMap<String, String>) -> bool {
        let Some(signature) = params.remove("sign") else {
            tracing::warn!("gateway callback without sign field rejected");
            return false;
        };
        self.verify(&params, &signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn config() -> GatewayConfig {
        GatewayConfig {
            app_id: "2016082100304253".into(),
            notify_url: Some("http://shop.example.com/api/v1/payments/notify".into()),
            return_url: Some("http://shop.example.com/api/v1/payments/return".into()),
            sandbox: true,
        }
    }

    /// Sign and verify with the same keypair so round trips close.
    fn test_client() -> GatewayClient {
        let rsa = Rsa::generate(2048).unwrap();
        let private_pem = rsa.private_key_to_pem().unwrap();
        let public_pem = rsa.public_key_to_pem().unwrap();
        GatewayClient::from_pem(config(), &private_pem, &public_pem).unwrap()
    }

    fn decode_query(query: &str) -> HashMap<String, String> {
        form_urlencoded::parse(query.as_bytes()).into_owned().collect()
    }

    fn sample_params() -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("subject".into(), json!("Test Order"));
        params.insert("out_trade_no".into(), json!("201702021131156"));
        params.insert("total_amount".into(), json!("100.00"));
        params
    }

    #[test]
    fn signed_params_round_trip() {
        let client = test_client();
        let query = client.sign_params(sample_params()).unwrap();
        let decoded = decode_query(&query);
        assert!(client.verify_callback(decoded));
    }

    #[test]
    fn wrong_public_key_rejects() {
        let client = test_client();
        let other = test_client();
        let query = client.sign_params(sample_params()).unwrap();
        assert!(!other.verify_callback(decode_query(&query)));
    }

    #[test]
    fn tampered_value_rejects() {
        let client = test_client();
        let query = client.sign_params(sample_params()).unwrap();
        let mut decoded = decode_query(&query);
        decoded.insert("total_amount".into(), "100.01".into());
        assert!(!client.verify_callback(decoded));
    }

    #[test]
    fn added_or_removed_key_rejects() {
        let client = test_client();
        let query = client.sign_params(sample_params()).unwrap();

        let mut extra = decode_query(&query);
        extra.insert("seller_id".into(), "2088102172401965".into());
        assert!(!client.verify_callback(extra));

        let mut missing = decode_query(&query);
        missing.remove("subject");
        assert!(!client.verify_callback(missing));
    }

    #[test]
    fn missing_sign_rejects() {
        let client = test_client();
        let query = client.sign_params(sample_params()).unwrap();
        let mut decoded = decode_query(&query);
        decoded.remove("sign");
        assert!(!client.verify_callback(decoded));
    }

    #[test]
    fn malformed_signature_rejects() {
        let client = test_client();
        let params: HashMap<String, String> =
            [("out_trade_no".to_string(), "201702021131156".to_string())].into();
        assert!(!client.verify(&params, "not-base64!!!"));
    }

    #[test]
    fn sign_type_excluded_from_verification() {
        let client = test_client();
        let query = client.sign_params(sample_params()).unwrap();
        let mut decoded = decode_query(&query);
        decoded.insert("sign_type".into(), "RSA2".into());
        assert!(client.verify_callback(decoded));
    }

    #[test]
    fn line_wrapped_signature_accepted() {
        let client = test_client();
        let query = client.sign_params(sample_params()).unwrap();
        let mut decoded = decode_query(&query);
        let sign = decoded.remove("sign").unwrap();
        let wrapped: String = sign
            .chars()
            .enumerate()
            .flat_map(|(i, c)| {
                if i > 0 && i % 64 == 0 { vec!['\n', c] } else { vec![c] }
            })
            .collect();
        assert!(client.verify(&decoded, &wrapped));
    }

    #[test]
    fn stale_sign_field_is_dropped_before_signing() {
        let client = test_client();
        let mut params = sample_params();
        params.insert("sign".into(), json!("stale-signature"));
        let query = client.sign_params(params).unwrap();
        assert!(client.verify_callback(decode_query(&query)));
    }

    #[test]
    fn page_pay_builds_full_redirect_url() {
        let client = test_client();
        let url = client
            .page_pay("Test Order", "201702021131156", Decimal::new(10000, 2), Map::new())
            .unwrap();
        assert!(url.starts_with("https://openapi.alipaydev.com/gateway.do?"));

        let query = url.split_once('?').unwrap().1;
        let decoded = decode_query(query);
        assert_eq!(decoded["app_id"], "2016082100304253");
        assert_eq!(decoded["method"], "alipay.trade.page.pay");
        assert_eq!(decoded["charset"], "utf-8");
        assert_eq!(decoded["sign_type"], "RSA2");
        assert_eq!(decoded["version"], "1.0");
        assert!(decoded.contains_key("timestamp"));
        assert!(decoded.contains_key("sign"));
        assert_eq!(
            decoded["notify_url"],
            "http://shop.example.com/api/v1/payments/notify"
        );

        // biz_content travels as compact key-sorted JSON
        let biz: Map<String, Value> = serde_json::from_str(&decoded["biz_content"]).unwrap();
        assert_eq!(biz["subject"], "Test Order");
        assert_eq!(biz["out_trade_no"], "201702021131156");
        assert_eq!(biz["total_amount"], "100.00");
        assert_eq!(biz["product_code"], "FAST_INSTANT_TRADE_PAY");
        assert!(!decoded["biz_content"].contains(' '));
    }

    #[test]
    fn amount_formats_with_two_decimals() {
        let client = test_client();
        let url = client
            .page_pay("Test Order", "1", Decimal::new(100, 0), Map::new())
            .unwrap();
        let query = url.split_once('?').unwrap().1;
        let decoded = decode_query(query);
        assert!(decoded["biz_content"].contains(r#""total_amount":"100.00""#));
    }

    #[test]
    fn garbage_pem_is_a_configuration_error() {
        let err = GatewayClient::from_pem(config(), b"not a key", b"also not a key");
        assert!(matches!(err, Err(PaymentError::InvalidKey(_))));
    }
}
