//! Stripe-style REST client.
//!
//! Form-encoded requests authenticated with the secret key as the basic-auth
//! user. Charges are payment intents; risk scores come from the expanded
//! `latest_charge.outcome`.

use std::collections::HashMap;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use orchard_core::{ChargeId, CustomerRef, Email, OrderId, PaymentMethodRef};

use super::{
    ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway, PreparedCharge,
    PrepareChargeRequest,
};
use crate::config::PaymentGatewayConfig;

const ORDER_ID_METADATA: &str = "order_id";

/// Payment gateway client.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: Url,
    secret_key: SecretString,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base.as_str())
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl StripeGateway {
    /// Create a gateway client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    /// Build an endpoint URL from path segments. Segments are percent-encoded,
    /// so opaque ids cannot escape their position in the path.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::Parse("API base cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
    }

    async fn fetch_intent(&self, id: &ChargeId) -> Result<PaymentIntentBody, GatewayError> {
        let mut url = self.endpoint(&["payment_intents", id.as_str()])?;
        url.query_pairs_mut().append_pair("expand[]", "latest_charge");

        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::ChargeNotFound(id.clone()));
        }
        parse_response(response).await
    }
}

impl PaymentGateway for StripeGateway {
    #[instrument(skip(self), fields(email = %email))]
    async fn find_or_create_customer(&self, email: &Email) -> Result<CustomerRef, GatewayError> {
        let mut url = self.endpoint(&["customers"])?;
        url.query_pairs_mut()
            .append_pair("email", email.as_str())
            .append_pair("limit", "1");

        let existing: ListBody<IdBody> =
            parse_response(self.request(Method::GET, url).send().await?).await?;
        if let Some(customer) = existing.data.into_iter().next() {
            debug!(customer = %customer.id, "Found existing gateway customer");
            return Ok(CustomerRef::new(customer.id));
        }

        let created: IdBody = parse_response(
            self.request(Method::POST, self.endpoint(&["customers"])?)
                .form(&[("email", email.as_str())])
                .send()
                .await?,
        )
        .await?;
        debug!(customer = %created.id, "Created gateway customer");
        Ok(CustomerRef::new(created.id))
    }

    #[instrument(skip(self), fields(customer = %customer, payment_method = %payment_method))]
    async fn attach_payment_method(
        &self,
        customer: &CustomerRef,
        payment_method: &PaymentMethodRef,
    ) -> Result<(), GatewayError> {
        let _: IdBody = parse_response(
            self.request(
                Method::POST,
                self.endpoint(&["payment_methods", payment_method.as_str(), "attach"])?,
            )
            .form(&[("customer", customer.as_str())])
            .send()
            .await?,
        )
        .await?;

        let _: IdBody = parse_response(
            self.request(Method::POST, self.endpoint(&["customers", customer.as_str()])?)
                .form(&[(
                    "invoice_settings[default_payment_method]",
                    payment_method.as_str(),
                )])
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount_minor))]
    async fn create_and_confirm_charge(
        &self,
        request: &ChargeRequest<'_>,
    ) -> Result<ChargeOutcome, GatewayError> {
        let mut form: Vec<(&str, String)> = vec![
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.gateway_code().to_string()),
            ("customer", request.customer.as_str().to_string()),
            ("confirm", "true".to_string()),
            ("off_session", "true".to_string()),
            ("metadata[order_id]", request.order_id.as_str().to_string()),
            ("expand[]", "latest_charge".to_string()),
        ];
        if let Some(payment_method) = request.payment_method {
            form.push(("payment_method", payment_method.as_str().to_string()));
        }

        let intent: PaymentIntentBody = parse_response(
            self.request(Method::POST, self.endpoint(&["payment_intents"])?)
                .header("Idempotency-Key", request.idempotency_key)
                .form(&form)
                .send()
                .await?,
        )
        .await?;
        Ok(intent.into_outcome())
    }

    #[instrument(skip(self), fields(charge = %id))]
    async fn retrieve_charge(&self, id: &ChargeId) -> Result<ChargeOutcome, GatewayError> {
        Ok(self.fetch_intent(id).await?.into_outcome())
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount_minor))]
    async fn prepare_charge(
        &self,
        request: &PrepareChargeRequest<'_>,
    ) -> Result<PreparedCharge, GatewayError> {
        let amount = request.amount_minor.to_string();

        let intent: PaymentIntentBody = match request.existing {
            Some(existing) => {
                parse_response(
                    self.request(
                        Method::POST,
                        self.endpoint(&["payment_intents", existing.as_str()])?,
                    )
                    .form(&[("amount", amount.as_str())])
                    .send()
                    .await?,
                )
                .await?
            }
            None => {
                let idempotency_key =
                    format!("order-{}-intent-{}", request.order_id, request.amount_minor);
                parse_response(
                    self.request(Method::POST, self.endpoint(&["payment_intents"])?)
                        .header("Idempotency-Key", idempotency_key)
                        .form(&[
                            ("amount", amount.as_str()),
                            ("currency", request.currency.gateway_code()),
                            ("automatic_payment_methods[enabled]", "true"),
                            ("metadata[order_id]", request.order_id.as_str()),
                        ])
                        .send()
                        .await?,
                )
                .await?
            }
        };

        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            GatewayError::Parse(format!("payment intent {} has no client secret", intent.id))
        })?;
        Ok(PreparedCharge {
            id: ChargeId::new(intent.id),
            client_secret,
            amount_minor: intent.amount,
        })
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListBody<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentBody {
    id: String,
    status: ChargeStatus,
    amount: i64,
    currency: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    latest_charge: Option<LatestCharge>,
}

/// `latest_charge` is an id unless expanded.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LatestCharge {
    Expanded(ChargeBody),
    Id(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct ChargeBody {
    #[serde(default)]
    outcome: Option<ChargeRiskOutcome>,
}

#[derive(Debug, Deserialize)]
struct ChargeRiskOutcome {
    #[serde(default)]
    risk_score: Option<u32>,
}

impl PaymentIntentBody {
    fn into_outcome(self) -> ChargeOutcome {
        let risk_score = match self.latest_charge {
            Some(LatestCharge::Expanded(charge)) => {
                charge.outcome.and_then(|outcome| outcome.risk_score)
            }
            Some(LatestCharge::Id(_)) | None => None,
        };
        let order_id = self
            .metadata
            .get(ORDER_ID_METADATA)
            .map(|id| OrderId::new(id.as_str()));

        ChargeOutcome {
            id: ChargeId::new(self.id),
            status: self.status,
            amount_minor: self.amount,
            currency: self.currency.to_ascii_lowercase(),
            risk_score,
            order_id,
        }
    }
}

/// Decode a success body, or turn an error body into `GatewayError::Api`.
async fn parse_response<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(api_error(status, &body));
    }
    response
        .json()
        .await
        .map_err(|e| GatewayError::Parse(e.to_string()))
}

fn api_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| match (envelope.error.message, envelope.error.code) {
            (Some(message), _) => Some(message),
            (None, Some(code)) => Some(code),
            (None, None) => None,
        })
        .unwrap_or_else(|| format!("gateway returned HTTP {}", status.as_u16()));
    GatewayError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn gateway(base: &str) -> StripeGateway {
        StripeGateway::new(&PaymentGatewayConfig {
            secret_key: SecretString::from("sk_test_abc123"),
            api_base: Url::parse(base).unwrap(),
            timeout: Duration::from_secs(15),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let gw = gateway("https://api.stripe.com/v1/");
        assert_eq!(
            gw.endpoint(&["payment_intents", "pi_123"]).unwrap().as_str(),
            "https://api.stripe.com/v1/payment_intents/pi_123"
        );
        assert_eq!(
            gw.endpoint(&["payment_intents", "../customers"])
                .unwrap()
                .as_str(),
            "https://api.stripe.com/v1/payment_intents/..%2Fcustomers"
        );
    }

    #[test]
    fn test_intent_with_expanded_charge() {
        let body: PaymentIntentBody = serde_json::from_str(
            r#"{
                "id": "pi_1",
                "status": "succeeded",
                "amount": 2950,
                "currency": "USD",
                "metadata": {"order_id": "order-1"},
                "latest_charge": {"id": "ch_1", "outcome": {"risk_score": 72}}
            }"#,
        )
        .unwrap();
        let outcome = body.into_outcome();
        assert_eq!(outcome.id, ChargeId::new("pi_1"));
        assert_eq!(outcome.status, ChargeStatus::Succeeded);
        assert_eq!(outcome.amount_minor, 2950);
        assert_eq!(outcome.currency, "usd");
        assert_eq!(outcome.risk_score, Some(72));
        assert_eq!(outcome.order_id, Some(OrderId::new("order-1")));
    }

    #[test]
    fn test_intent_with_unexpanded_charge() {
        let body: PaymentIntentBody = serde_json::from_str(
            r#"{"id": "pi_2", "status": "requires_action", "amount": 100, "currency": "usd", "latest_charge": "ch_2"}"#,
        )
        .unwrap();
        let outcome = body.into_outcome();
        assert_eq!(outcome.risk_score, None);
        assert_eq!(outcome.order_id, None);
        assert!(!outcome.status.is_success_class());
    }

    #[test]
    fn test_api_error_prefers_message() {
        let err = api_error(
            StatusCode::PAYMENT_REQUIRED,
            r#"{"error": {"message": "Your card was declined.", "code": "card_declined"}}"#,
        );
        assert!(matches!(
            err,
            GatewayError::Api { status: 402, ref message } if message == "Your card was declined."
        ));

        let err = api_error(StatusCode::BAD_GATEWAY, "<html>");
        assert_eq!(err.to_string(), "gateway returned HTTP 502");
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", gateway("https://api.stripe.com/v1/"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk_test_abc123"));
    }
}
