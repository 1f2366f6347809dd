//! Route table and request handlers.
//!
//! Handlers never fail: every outcome is turned into a response here, and
//! only routing failures reach [`handle_rejection`]. Callers see generic
//! messages; details go to the log.

use std::convert::Infallible;

use bytes::Bytes;
use serde::Deserialize;
use subscription_broker::{
    BrokerHandle, NotificationOutcome, OperationCanceled, ResourceId, ResourceKind, TenantId,
    NOTIFICATION_ROUTE,
};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const SUCCESS: &str = "Success";
const ERROR: &str = "Error";
const NO_APPLICATION: &str = "No Application found for this tenant";
const NO_RECORD: &str = "No Record Found";
const UNAVAILABLE: &str = "Service Unavailable";

#[derive(Debug, Deserialize)]
struct NotifyQuery {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterQuery {
    tenant_id: Option<String>,
    resource: Option<String>,
    resource_url: Option<String>,
    application_id: Option<String>,
    application_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveQuery {
    tenant_id: Option<String>,
    resource: Option<String>,
}

/// Every route served by the webhook, with request logging and rejection
/// handling applied.
///
/// Paths are matched before methods so that an unknown path answers 404
/// rather than 405.
pub fn routes(
    broker: BrokerHandle,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
    subscription_routes(broker.clone())
        .or(call_record_routes(broker))
        .recover(handle_rejection)
        .with(warp::log::custom(log_request))
}

fn with_broker(
    broker: BrokerHandle,
) -> impl Filter<Extract = (BrokerHandle,), Error = Infallible> + Clone {
    warp::any().map(move || broker.clone())
}

fn subscription_routes(
    broker: BrokerHandle,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let notify = warp::path(NOTIFICATION_ROUTE)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::query::<NotifyQuery>())
        .and(warp::body::bytes())
        .and(with_broker(broker.clone()))
        .and_then(notify);

    let register = warp::path(NOTIFICATION_ROUTE)
        .and(warp::path("register"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<RegisterQuery>())
        .and(with_broker(broker.clone()))
        .and_then(register);

    let remove = warp::path(NOTIFICATION_ROUTE)
        .and(warp::path("remove"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<RemoveQuery>())
        .and(with_broker(broker))
        .and_then(remove);

    notify.or(register).unify().or(remove).unify()
}

fn call_record_routes(
    broker: BrokerHandle,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let ids = warp::path!("callrecord")
        .and(warp::get())
        .and(with_broker(broker.clone()))
        .and_then(call_record_ids);

    let all = warp::path!("callrecord" / "all")
        .and(warp::get())
        .and(with_broker(broker.clone()))
        .and_then(all_call_records);

    let single = warp::path!("callrecord" / ResourceId)
        .and(warp::get())
        .and(with_broker(broker))
        .and_then(call_record);

    ids.or(all).unify().or(single).unify()
}

fn text(status: StatusCode, body: &'static str) -> Response {
    warp::reply::with_status(body, status).into_response()
}

fn canceled(_: OperationCanceled) -> Response {
    text(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE)
}

fn outcome(succeeded: bool) -> Response {
    if succeeded {
        text(StatusCode::OK, SUCCESS)
    } else {
        text(StatusCode::BAD_REQUEST, ERROR)
    }
}

async fn notify(
    query: NotifyQuery,
    body: Bytes,
    broker: BrokerHandle,
) -> Result<Response, Infallible> {
    let response = match broker.process_notification(query.validation_token.as_deref(), &body) {
        NotificationOutcome::Handshake(token) => warp::reply::with_header(
            warp::reply::with_status(token, StatusCode::OK),
            "content-type",
            "text/plain",
        )
        .into_response(),
        NotificationOutcome::Accepted(report) => {
            tracing::debug!(
                received = report.received,
                dispatched = report.dispatched,
                rejected = report.rejected_count(),
                "Accepted notification delivery"
            );
            StatusCode::ACCEPTED.into_response()
        }
        NotificationOutcome::Rejected(_) => StatusCode::BAD_REQUEST.into_response(),
    };
    Ok(response)
}

async fn register(query: RegisterQuery, broker: BrokerHandle) -> Result<Response, Infallible> {
    let tenant_id = query.tenant_id.as_deref().and_then(|t| t.parse::<TenantId>().ok());
    let kind = query.resource.as_deref().and_then(|r| r.parse::<ResourceKind>().ok());
    let resource_url = query.resource_url.as_deref().filter(|url| !url.trim().is_empty());

    let (Some(tenant_id), Some(kind), Some(resource_url)) = (tenant_id, kind, resource_url) else {
        tracing::debug!(tenant_id = ?query.tenant_id, resource = ?query.resource, "Invalid register request");
        return Ok(text(StatusCode::BAD_REQUEST, ERROR));
    };

    match (query.application_id.as_deref(), query.application_secret) {
        (Some(application_id), Some(secret)) => {
            let Ok(application_id) = application_id.parse() else {
                tracing::debug!(%tenant_id, "Invalid application id in register request");
                return Ok(text(StatusCode::BAD_REQUEST, ERROR));
            };
            broker.add_credential(application_id, tenant_id, secret);
        }
        _ if !broker.has_credential(tenant_id) => {
            tracing::info!(%tenant_id, "No application registered for tenant");
            return Ok(text(StatusCode::BAD_REQUEST, NO_APPLICATION));
        }
        _ => {}
    }

    Ok(broker
        .register(tenant_id, kind, resource_url)
        .await
        .map_or_else(canceled, outcome))
}

async fn remove(query: RemoveQuery, broker: BrokerHandle) -> Result<Response, Infallible> {
    let tenant_id = query.tenant_id.as_deref().and_then(|t| t.parse::<TenantId>().ok());
    let kind = query.resource.as_deref().and_then(|r| r.parse::<ResourceKind>().ok());

    let (Some(tenant_id), Some(kind)) = (tenant_id, kind) else {
        tracing::debug!(tenant_id = ?query.tenant_id, resource = ?query.resource, "Invalid remove request");
        return Ok(text(StatusCode::BAD_REQUEST, ERROR));
    };

    Ok(broker
        .remove(tenant_id, kind)
        .await
        .map_or_else(canceled, outcome))
}

async fn call_record_ids(broker: BrokerHandle) -> Result<Response, Infallible> {
    let ids = broker.call_records().ids().await;
    Ok(warp::reply::json(&ids).into_response())
}

async fn all_call_records(broker: BrokerHandle) -> Result<Response, Infallible> {
    let records = broker.call_records().all().await;
    Ok(warp::reply::json(&records).into_response())
}

async fn call_record(id: ResourceId, broker: BrokerHandle) -> Result<Response, Infallible> {
    Ok(match broker.call_records().get(id).await {
        Some(record) => warp::reply::json(&record).into_response(),
        None => text(StatusCode::NOT_FOUND, NO_RECORD),
    })
}

fn log_request(info: warp::log::Info<'_>) {
    tracing::info!(
        method = %info.method(),
        path = info.path(),
        status = info.status().as_u16(),
        elapsed_ms = info.elapsed().as_millis() as u64,
        "{} {} -> {}",
        info.method(),
        info.path(),
        info.status().as_u16()
    );
}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, ERROR)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
    } else {
        tracing::warn!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    };

    Ok(text(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse<T: serde::de::DeserializeOwned + Send + 'static>(query: &str) -> T {
        warp::test::request()
            .path(&format!("/?{query}"))
            .filter(&warp::query::<T>())
            .await
            .expect("query should parse")
    }

    #[tokio::test]
    async fn test_register_query_uses_camel_case() {
        let query: RegisterQuery = parse(
            "tenantId=t&resource=CallRecord&resourceUrl=communications%2FcallRecords&applicationId=a&applicationSecret=s",
        )
        .await;
        assert_eq!(query.tenant_id.as_deref(), Some("t"));
        assert_eq!(query.resource.as_deref(), Some("CallRecord"));
        assert_eq!(query.resource_url.as_deref(), Some("communications/callRecords"));
        assert_eq!(query.application_id.as_deref(), Some("a"));
        assert_eq!(query.application_secret.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_missing_query_fields_are_none() {
        let query: RemoveQuery = parse("tenantId=t").await;
        assert!(query.resource.is_none());

        let query: NotifyQuery = parse("").await;
        assert!(query.validation_token.is_none());
    }

    #[tokio::test]
    async fn test_validation_token_is_decoded() {
        let query: NotifyQuery = parse("validationToken=Validation%3A%20Testing").await;
        assert_eq!(query.validation_token.as_deref(), Some("Validation: Testing"));
    }
}
