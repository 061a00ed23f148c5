//! REST resource binding: five CRUDL handlers under a common name,
//! wrapped in a JSON envelope.

use crate::error::Result;
use crate::http::{header, Method, Response, StatusCode};
use crate::server::request_generator::RequestGenerator;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_LIMIT: u64 = 100;

/// Failures reported by resource handlers; mapped onto the envelope's
/// error object and the HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("object not found")]
    NotFound,
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Internal(String),
}

impl RestError {
    fn code(&self) -> u32 {
        match self {
            RestError::NotFound => 404,
            RestError::Invalid(_) => 400,
            RestError::Internal(_) => 500,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RestError::NotFound => StatusCode::NOT_FOUND,
            RestError::Invalid(_) => StatusCode::BAD_REQUEST,
            RestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A REST resource: an object type plus its CRUDL handlers.
///
/// Objects cross the wire through the user-provided serde mapping.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    type Object: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// The name the resource is mounted under (`/{name}`, no slash).
    fn name(&self) -> &str;

    /// `GET /{name}?limit=L&offset=O`
    async fn list(&self, limit: u64, offset: u64) -> Result<Vec<Self::Object>, RestError>;

    /// `GET /{name}/{id}`
    async fn get(&self, id: &str) -> Result<Self::Object, RestError>;

    /// `POST /{name}`
    async fn create(&self, obj: Self::Object) -> Result<Self::Object, RestError>;

    /// `PATCH /{name}/{id}`
    async fn modify(&self, id: &str, obj: Self::Object) -> Result<Self::Object, RestError>;

    /// `DELETE /{name}/{id}`
    async fn remove(&self, id: &str) -> Result<(), RestError>;
}

/// Object-erased view of a [`Resource`], as stored by the router.
#[async_trait]
pub(crate) trait ErasedResource: Send + Sync {
    fn name(&self) -> &str;
    async fn list(&self, limit: u64, offset: u64) -> Result<Value, RestError>;
    async fn get(&self, id: &str) -> Result<Value, RestError>;
    async fn create(&self, body: &str) -> Result<Value, RestError>;
    async fn modify(&self, id: &str, body: &str) -> Result<Value, RestError>;
    async fn remove(&self, id: &str) -> Result<(), RestError>;
}

fn to_value<T: Serialize>(obj: &T) -> Result<Value, RestError> {
    serde_json::to_value(obj).map_err(|err| RestError::Internal(err.to_string()))
}

fn from_body<T: DeserializeOwned>(body: &str) -> Result<T, RestError> {
    serde_json::from_str(body).map_err(|err| RestError::Invalid(err.to_string()))
}

#[async_trait]
impl<R: Resource> ErasedResource for R {
    fn name(&self) -> &str {
        Resource::name(self)
    }

    async fn list(&self, limit: u64, offset: u64) -> Result<Value, RestError> {
        let objects = Resource::list(self, limit, offset).await?;
        to_value(&objects)
    }

    async fn get(&self, id: &str) -> Result<Value, RestError> {
        let object = Resource::get(self, id).await?;
        to_value(&object)
    }

    async fn create(&self, body: &str) -> Result<Value, RestError> {
        let object = Resource::create(self, from_body(body)?).await?;
        to_value(&object)
    }

    async fn modify(&self, id: &str, body: &str) -> Result<Value, RestError> {
        let object = Resource::modify(self, id, from_body(body)?).await?;
        to_value(&object)
    }

    async fn remove(&self, id: &str) -> Result<(), RestError> {
        Resource::remove(self, id).await
    }
}

#[derive(serde::Deserialize, Default)]
struct ListParams {
    limit: Option<u64>,
    offset: Option<u64>,
}

fn envelope(status: StatusCode, code: u32, message: &str, data: Value) -> Response {
    let body = json!({
        "error": { "code": code, "message": message },
        "data": data,
    });
    Response::new(status)
        .with_header(header::CONTENT_TYPE, "application/json")
        .with_body(body.to_string())
}

fn success(status: StatusCode, data: Value) -> Response {
    envelope(status, 0, "", data)
}

fn failure(err: &RestError) -> Response {
    envelope(err.status(), err.code(), &err.to_string(), Value::Null)
}

/// Dispatch one request that matched `/{name}` or `/{name}/…`.
pub(crate) async fn handle(
    resource: &Arc<dyn ErasedResource>,
    gen: RequestGenerator<'_>,
) -> Result<Response> {
    let (method, id, query) = {
        let head = gen.head();
        let prefix_len = resource.name().len() + 1;
        let tail = head.target.resource_string().get(prefix_len..).unwrap_or("");
        (
            head.method.clone(),
            tail.trim_start_matches('/').to_owned(),
            head.target.query_string().to_owned(),
        )
    };
    let is_collection = id.is_empty();

    let outcome = if method == Method::GET && is_collection {
        let params: ListParams = serde_urlencoded::from_str(&query).unwrap_or_default();
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = params.offset.unwrap_or(0);
        resource
            .list(limit, offset)
            .await
            .map(|data| success(StatusCode::OK, data))
    } else if method == Method::GET {
        resource
            .get(&id)
            .await
            .map(|data| success(StatusCode::OK, data))
    } else if method == Method::POST && is_collection {
        let req = gen.into_request().await?;
        resource
            .create(req.body_text().unwrap_or(""))
            .await
            .map(|data| success(StatusCode::CREATED, data))
    } else if method == Method::PATCH && !is_collection {
        let req = gen.into_request().await?;
        resource
            .modify(&id, req.body_text().unwrap_or(""))
            .await
            .map(|data| success(StatusCode::OK, data))
    } else if method == Method::DELETE && !is_collection {
        resource
            .remove(&id)
            .await
            .map(|()| success(StatusCode::OK, Value::Null))
    } else {
        return Ok(envelope(
            StatusCode::BAD_REQUEST,
            400,
            "unsupported resource operation",
            Value::Null,
        ));
    };

    Ok(outcome.unwrap_or_else(|err| failure(&err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestHead;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: Option<u64>,
        text: String,
    }

    #[derive(Default)]
    struct Notes {
        store: Mutex<BTreeMap<u64, Note>>,
        next_id: Mutex<u64>,
    }

    #[async_trait]
    impl Resource for Notes {
        type Object = Note;

        fn name(&self) -> &str {
            "notes"
        }

        async fn list(&self, limit: u64, offset: u64) -> Result<Vec<Note>, RestError> {
            Ok(self
                .store
                .lock()
                .unwrap()
                .values()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn get(&self, id: &str) -> Result<Note, RestError> {
            let id: u64 = id.parse().map_err(|_| RestError::Invalid("bad id".into()))?;
            self.store
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RestError::NotFound)
        }

        async fn create(&self, mut obj: Note) -> Result<Note, RestError> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            obj.id = Some(*next);
            self.store.lock().unwrap().insert(*next, obj.clone());
            Ok(obj)
        }

        async fn modify(&self, id: &str, obj: Note) -> Result<Note, RestError> {
            let id: u64 = id.parse().map_err(|_| RestError::Invalid("bad id".into()))?;
            let mut store = self.store.lock().unwrap();
            let slot = store.get_mut(&id).ok_or(RestError::NotFound)?;
            slot.text = obj.text;
            Ok(slot.clone())
        }

        async fn remove(&self, id: &str) -> Result<(), RestError> {
            let id: u64 = id.parse().map_err(|_| RestError::Invalid("bad id".into()))?;
            self.store
                .lock()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or(RestError::NotFound)
        }
    }

    fn erased() -> Arc<dyn ErasedResource> {
        Arc::new(Notes::default())
    }

    async fn call(
        resource: &Arc<dyn ErasedResource>,
        method: Method,
        target: &str,
        body: &str,
    ) -> Response {
        let head = RequestHead::new(method, target);
        let gen = RequestGenerator::buffered(head, body.to_owned());
        handle(resource, gen).await.unwrap()
    }

    fn parsed(resp: &Response) -> Value {
        serde_json::from_str(resp.body().as_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips_the_object() {
        let notes = erased();

        let resp = call(&notes, Method::POST, "/notes", r#"{"id":null,"text":"hi"}"#).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = parsed(&resp);
        assert_eq!(body["error"]["code"], 0);
        assert_eq!(body["data"]["text"], "hi");
        let id = body["data"]["id"].as_u64().unwrap();

        let resp = call(&notes, Method::GET, &format!("/notes/{id}"), "").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let note: Note = serde_json::from_value(parsed(&resp)["data"].clone()).unwrap();
        assert_eq!(note, Note { id: Some(id), text: "hi".into() });
    }

    #[tokio::test]
    async fn list_honours_limit_and_offset() {
        let notes = erased();
        for i in 0..5 {
            call(
                &notes,
                Method::POST,
                "/notes",
                &format!(r#"{{"id":null,"text":"n{i}"}}"#),
            )
            .await;
        }

        let resp = call(&notes, Method::GET, "/notes?limit=2&offset=1", "").await;
        let data = parsed(&resp)["data"].clone();
        assert_eq!(data.as_array().unwrap().len(), 2);
        assert_eq!(data[0]["text"], "n1");
    }

    #[tokio::test]
    async fn missing_object_maps_to_the_envelope_error() {
        let notes = erased();
        let resp = call(&notes, Method::GET, "/notes/99", "").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = parsed(&resp);
        assert_eq!(body["error"]["code"], 404);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn modify_and_remove() {
        let notes = erased();
        let resp = call(&notes, Method::POST, "/notes", r#"{"id":null,"text":"a"}"#).await;
        let id = parsed(&resp)["data"]["id"].as_u64().unwrap();

        let resp = call(
            &notes,
            Method::PATCH,
            &format!("/notes/{id}"),
            r#"{"id":null,"text":"b"}"#,
        )
        .await;
        assert_eq!(parsed(&resp)["data"]["text"], "b");

        let resp = call(&notes, Method::DELETE, &format!("/notes/{id}"), "").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = call(&notes, Method::GET, &format!("/notes/{id}"), "").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
