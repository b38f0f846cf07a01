use crate::errors::DataReceiverError;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub type HandlerBody = BoxBody<Bytes, DataReceiverError>;

/// Reads at most `limit` bytes of `body` and deserializes them as JSON.
pub async fn deserialize_body<T, B>(body: B, limit: usize) -> Result<T, DataReceiverError>
where
    T: DeserializeOwned,
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                DataReceiverError::RequestBodyTooLarge(limit)
            } else {
                DataReceiverError::RequestBodyError(e.to_string())
            }
        })?
        .to_bytes();

    serde_json::from_slice(&bytes).map_err(|e| DataReceiverError::RequestBodyError(e.to_string()))
}

/// Serializes a value to a JSON body.
pub fn serialize_to_body<T: Serialize>(value: &T) -> Result<HandlerBody, DataReceiverError> {
    let bytes = serde_json::to_vec(value).map(Bytes::from)?;
    Ok(Full::new(bytes).map_err(|e| match e {}).boxed())
}

/// Builds a JSON response with the given status.
pub fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<HandlerBody>, DataReceiverError> {
    let mut response = Response::new(serialize_to_body(value)?);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        table_name: String,
    }

    #[tokio::test]
    async fn test_deserialize_body() {
        let body = Full::new(Bytes::from(r#"{"table_name": "person"}"#));
        let payload: Payload = deserialize_body(body, 1024).await.unwrap();
        assert_eq!(payload.table_name, "person");

        let body = Full::new(Bytes::from("not json"));
        assert!(matches!(
            deserialize_body::<Payload, _>(body, 1024).await,
            Err(DataReceiverError::RequestBodyError(_))
        ));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let body = Full::new(Bytes::from(r#"{"table_name": "person"}"#));
        assert!(matches!(
            deserialize_body::<Payload, _>(body, 8).await,
            Err(DataReceiverError::RequestBodyTooLarge(8))
        ));
    }

    #[tokio::test]
    async fn test_json_response() {
        let value = HashMap::from([("message", "ok")]);
        let response = json_response(StatusCode::ACCEPTED, &value).unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], br#"{"message":"ok"}"#);
    }
}
