use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::{IntoResponses, PartialSchema, ToSchema};

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The workspace-wide error type.
///
/// Every variant carries the message shown to the caller; `Display` renders
/// that message verbatim so callers can assert on it. Sources are attached
/// for logging but never serialized.
#[derive(Error, Debug, Serialize)]
pub enum CommonError {
    #[error("{msg}")]
    InvalidRequest {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("{msg}")]
    Forbidden {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("{msg}")]
    Unprocessable {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("{msg}")]
    MethodNotAllowed { msg: String },
    #[error("{msg}")]
    UpstreamGateway {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("{msg}")]
    Internal {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("unknown error")]
    Unknown(
        #[serde(skip)]
        #[from]
        anyhow::Error,
    ),
    #[error("io error")]
    IoError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::io::Error,
    },
    #[error("url parse error")]
    UrlParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: url::ParseError,
    },
    #[error("serde json error")]
    SerdeSerializationError {
        #[serde(skip)]
        #[from]
        #[source]
        source: serde_json::Error,
    },
    #[error("address parse error")]
    AddrParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::net::AddrParseError,
    },
}

impl CommonError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        CommonError::InvalidRequest {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CommonError::Forbidden {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        CommonError::Unprocessable {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CommonError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            CommonError::Forbidden { .. } => StatusCode::FORBIDDEN,
            CommonError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CommonError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            CommonError::UpstreamGateway { .. } => StatusCode::BAD_GATEWAY,
            CommonError::Internal { .. }
            | CommonError::Unknown(_)
            | CommonError::IoError { .. }
            | CommonError::UrlParseError { .. }
            | CommonError::SerdeSerializationError { .. }
            | CommonError::AddrParseError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CommonError::InvalidRequest { .. } => "InvalidRequest",
            CommonError::Forbidden { .. } => "Forbidden",
            CommonError::Unprocessable { .. } => "Unprocessable",
            CommonError::MethodNotAllowed { .. } => "MethodNotAllowed",
            CommonError::UpstreamGateway { .. } => "UpstreamGateway",
            CommonError::Internal { .. }
            | CommonError::Unknown(_)
            | CommonError::IoError { .. }
            | CommonError::UrlParseError { .. }
            | CommonError::SerdeSerializationError { .. }
            | CommonError::AddrParseError { .. } => "InternalServerError",
        }
    }
}

impl ToSchema for CommonError {
    fn name() -> std::borrow::Cow<'static, str> {
        std::borrow::Cow::Borrowed("Error")
    }

    fn schemas(
        _schemas: &mut Vec<(
            String,
            utoipa::openapi::RefOr<utoipa::openapi::schema::Schema>,
        )>,
    ) {
        // nothing by default
    }
}

impl PartialSchema for CommonError {
    fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
        utoipa::openapi::ObjectBuilder::new()
            .property(
                "name",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("name")
            .property(
                "message",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("message")
            .into()
    }
}

impl IntoResponses for CommonError {
    fn responses() -> std::collections::BTreeMap<
        String,
        utoipa::openapi::RefOr<utoipa::openapi::response::Response>,
    > {
        let mut responses = std::collections::BTreeMap::new();

        let error_content = utoipa::openapi::ContentBuilder::new()
            .schema(Some(CommonError::schema()))
            .build();

        for (status, description) in [
            ("400", "Invalid request"),
            ("403", "Forbidden"),
            ("405", "Method not allowed"),
            ("422", "Unprocessable request"),
            ("502", "Upstream gateway error"),
            ("500", "Server error"),
        ] {
            responses.insert(
                status.to_string(),
                utoipa::openapi::ResponseBuilder::new()
                    .description(description)
                    .content("application/json", error_content.clone())
                    .into(),
            );
        }

        responses
    }
}

impl IntoResponse for CommonError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = Json(ErrorResponse {
            name: self.name().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    name: String,
    message: String,
}
