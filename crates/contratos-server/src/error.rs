use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use contratos_import::ImportError;
use contratos_store::StoreError;
use serde_json::json;
use tracing::error;

/// Error body: `{ "error": kind, "message": text }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: message.into(),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let (status, kind) = match &err {
            ImportError::MissingColumn(_)
            | ImportError::EmptyFile
            | ImportError::InvalidHeader(_)
            | ImportError::Csv(_) => (StatusCode::BAD_REQUEST, "validation"),
            ImportError::BatchNotFound(_) | ImportError::ContractNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ImportError::BatchNotStaged { .. }
            | ImportError::DuplicateHeader(_)
            | ImportError::Store(StoreError::DuplicateContract(_)) => {
                (StatusCode::CONFLICT, "conflict")
            }
            ImportError::Reconciliation { .. } | ImportError::HeaderNotFound { .. } => {
                (StatusCode::CONFLICT, "reconciliation")
            }
            ImportError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
            ImportError::Io(_) | ImportError::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(kind = self.kind, message = %self.message, "request failed");
        }
        let body = json!({ "error": self.kind, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contratos_core::TransactionType;

    #[test]
    fn status_per_error_kind() {
        let cases = [
            (ImportError::EmptyFile, StatusCode::BAD_REQUEST, "validation"),
            (ImportError::MissingColumn("ativo"), StatusCode::BAD_REQUEST, "validation"),
            (ImportError::BatchNotFound(7), StatusCode::NOT_FOUND, "not_found"),
            (
                ImportError::DuplicateHeader("123".into()),
                StatusCode::CONFLICT,
                "conflict",
            ),
            (
                ImportError::Reconciliation {
                    row: 1,
                    contract: "123".into(),
                    asset: "A1".into(),
                    client: "001".into(),
                    transaction: TransactionType::Retorno,
                },
                StatusCode::CONFLICT,
                "reconciliation",
            ),
            (
                ImportError::Store(StoreError::NoResults),
                StatusCode::INTERNAL_SERVER_ERROR,
                "store",
            ),
        ];
        for (err, status, kind) in cases {
            let api = ApiError::from(err);
            assert_eq!((api.status, api.kind), (status, kind));
        }
    }
}
